//! Command spellings
//!
//! The multi-session debugger extends MI with time-recording execution
//! commands and a cross-session backtrace. Plain gdb gets the standard
//! `exec-*` family instead.

use serde::{Deserialize, Serialize};

/// Session slot for breakpoints of a dialect without session scoping
pub const ALL_SESSIONS: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Multi-session debugger with `--session` scoping
    #[default]
    Ddb,
    /// Stock gdb
    Gdb,
}

/// Execution commands that take the reverse switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Next,
    Step,
    Finish,
}

impl Dialect {
    /// Continue every session, or only `session`
    pub fn continue_command(self, session: Option<u32>, reverse: bool) -> String {
        let base = match self {
            Dialect::Ddb => "record-time-and-continue",
            Dialect::Gdb => "exec-continue",
        };
        with_reverse(format!("{base}{}", self.scope(session)), reverse)
    }

    pub fn step_command(self, step: Step, thread_id: i64, reverse: bool) -> String {
        let base = match (self, step) {
            (Dialect::Ddb, Step::Next) => "record-time-and-next",
            (Dialect::Ddb, Step::Step) => "record-time-and-step",
            (Dialect::Ddb, Step::Finish) => "record-time-and-finish",
            (Dialect::Gdb, Step::Next) => "exec-next",
            (Dialect::Gdb, Step::Step) => "exec-step",
            (Dialect::Gdb, Step::Finish) => "exec-finish",
        };
        with_reverse(format!("{base} --thread {thread_id}"), reverse)
    }

    pub fn interrupt_command(self, session: Option<u32>) -> String {
        format!("exec-interrupt{}", self.scope(session))
    }

    pub fn stack_command(self, thread_id: i64) -> String {
        match self {
            Dialect::Ddb => format!("bt-remote --thread {thread_id}"),
            Dialect::Gdb => format!("stack-list-frames --thread {thread_id}"),
        }
    }

    /// ` --session N` for a scoped command
    ///
    /// Stock gdb has no sessions; unscoped commands there address the
    /// current inferior, scoped ones all of them.
    pub fn session_switch(self, session: u32) -> String {
        match self {
            Dialect::Ddb => format!(" --session {session}"),
            Dialect::Gdb => String::new(),
        }
    }

    pub fn is_session_aware(self) -> bool {
        matches!(self, Dialect::Ddb)
    }

    /// Sessions that each get their own physical breakpoint
    ///
    /// Without session scoping a single unscoped insert covers every
    /// inferior; it is tracked under [`ALL_SESSIONS`].
    pub fn placement(self, requested: &[u32]) -> Vec<u32> {
        if self.is_session_aware() {
            requested.to_vec()
        } else {
            vec![ALL_SESSIONS]
        }
    }

    fn scope(self, session: Option<u32>) -> String {
        match (self, session) {
            (Dialect::Ddb, Some(s)) => format!(" --session {s}"),
            (Dialect::Ddb, None) => String::new(),
            (Dialect::Gdb, _) => " --all".to_string(),
        }
    }
}

fn with_reverse(command: String, reverse: bool) -> String {
    if reverse {
        format!("{command} --reverse")
    } else {
        command
    }
}
