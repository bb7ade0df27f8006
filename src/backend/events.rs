//! Events produced by the backend
//!
//! The set is closed: the orchestrator matches on every variant.

use serde::Serialize;

use crate::mi::{Record, Value};

/// Where a piece of output text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCategory {
    /// Debugger console stream (`~`)
    Console,
    /// Debuggee output (`@`)
    Stdout,
    /// Bridge diagnostics and debugger stderr
    Stderr,
    /// Debugger log stream (`&`)
    Log,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// The session service answered the readiness poll
    Ready,
    Output { category: OutputCategory, text: String },
    Running(RunningNotice),
    BreakpointHit(StopEvent),
    Watchpoint(StopEvent),
    StepEnd(StopEvent),
    SignalStop(StopEvent),
    /// A stop with a reason we do not classify
    Stopped(StopEvent),
    ThreadCreated(ThreadNotice),
    ThreadExited(ThreadNotice),
    /// The debugger process went away
    Quit { code: Option<i32> },
}

impl BackendEvent {
    pub fn output(category: OutputCategory, text: impl Into<String>) -> Self {
        Self::Output {
            category,
            text: text.into(),
        }
    }

    /// Build the stop event for a `*stopped` record
    pub fn from_stop(record: Record) -> Self {
        let reason = record.record_str("reason").map(str::to_string);
        let event = StopEvent {
            reason: reason.clone(),
            record,
        };
        match reason.as_deref() {
            // A stop without a reason comes from stepping
            None => Self::StepEnd(event),
            Some("breakpoint-hit") => Self::BreakpointHit(event),
            Some("watchpoint-trigger" | "read-watchpoint-trigger" | "access-watchpoint-trigger") => {
                Self::Watchpoint(event)
            }
            Some(
                "function-finished" | "location-reached" | "end-stepping-range" | "watchpoint-scope"
                | "solib-event" | "syscall-entry" | "syscall-return" | "fork" | "vfork" | "exec",
            ) => Self::StepEnd(event),
            Some("signal-received") => Self::SignalStop(event),
            Some(_) => Self::Stopped(event),
        }
    }
}

/// A `*stopped` record and accessors for the fields routing depends on
#[derive(Debug, Clone, PartialEq)]
pub struct StopEvent {
    pub reason: Option<String>,
    pub record: Record,
}

/// The `stopped-threads` field: either `"all"` or an explicit id list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoppedThreads {
    All,
    List(Vec<i64>),
}

impl StopEvent {
    pub fn thread_id(&self) -> Option<i64> {
        self.record.record_str("thread-id").and_then(|t| t.parse().ok())
    }

    pub fn session_id(&self) -> Option<u32> {
        self.record.record_str("session-id").and_then(|s| s.parse().ok())
    }

    pub fn breakpoint_number(&self) -> Option<u32> {
        self.record.record_str("bkptno").and_then(|n| n.parse().ok())
    }

    pub fn stopped_threads(&self) -> StoppedThreads {
        match self.record.record("stopped-threads") {
            Some(Value::Str(s)) if s == "all" => StoppedThreads::All,
            Some(value) => StoppedThreads::List(
                value
                    .elements()
                    .into_iter()
                    .filter_map(|v| v.as_str().and_then(|t| t.parse().ok()))
                    .collect(),
            ),
            None => StoppedThreads::All,
        }
    }

    /// Source file of the stop location, preferring the full path
    pub fn file(&self) -> Option<&str> {
        self.record
            .record_str("frame.fullname")
            .or_else(|| self.record.record_str("frame.file"))
    }

    pub fn line(&self) -> Option<u32> {
        self.record.record_str("frame.line").and_then(|l| l.parse().ok())
    }
}

/// `*running` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningNotice {
    /// Thread id, or `None` for `thread-id="all"`
    pub thread_id: Option<i64>,
    pub session_id: Option<u32>,
}

impl RunningNotice {
    pub fn from_record(record: &Record) -> Self {
        Self {
            thread_id: record.record_str("thread-id").and_then(|t| t.parse().ok()),
            session_id: record.record_str("session-id").and_then(|s| s.parse().ok()),
        }
    }
}

/// `=thread-created` / `=thread-exited` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadNotice {
    pub thread_id: i64,
    pub group_id: Option<String>,
    pub session_id: Option<u32>,
    pub session_alias: Option<String>,
}

impl ThreadNotice {
    pub fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            thread_id: record.record_str("id")?.parse().ok()?,
            group_id: record.record_str("group-id").map(str::to_string),
            session_id: record.record_str("session-id").and_then(|s| s.parse().ok()),
            session_alias: record.record_str("session-alias").map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mi::parse_line;

    fn stop(line: &str) -> BackendEvent {
        BackendEvent::from_stop(parse_line(line))
    }

    #[test]
    fn test_stop_classification() {
        assert!(matches!(stop(r#"*stopped,reason="breakpoint-hit",bkptno="1""#), BackendEvent::BreakpointHit(_)));
        assert!(matches!(stop(r#"*stopped,reason="read-watchpoint-trigger""#), BackendEvent::Watchpoint(_)));
        assert!(matches!(stop(r#"*stopped,reason="end-stepping-range""#), BackendEvent::StepEnd(_)));
        assert!(matches!(stop(r#"*stopped,reason="solib-event""#), BackendEvent::StepEnd(_)));
        assert!(matches!(stop("*stopped"), BackendEvent::StepEnd(_)));
        assert!(matches!(stop(r#"*stopped,reason="signal-received""#), BackendEvent::SignalStop(_)));
        assert!(matches!(stop(r#"*stopped,reason="exited-normally""#), BackendEvent::Stopped(_)));
    }

    #[test]
    fn test_stop_accessors() {
        let BackendEvent::BreakpointHit(event) = stop(
            r#"*stopped,reason="breakpoint-hit",bkptno="4",frame={file="a.c",fullname="/src/a.c",line="12"},thread-id="3",session-id="2",stopped-threads=["1","3"]"#,
        ) else {
            panic!("expected breakpoint hit");
        };
        assert_eq!(event.thread_id(), Some(3));
        assert_eq!(event.session_id(), Some(2));
        assert_eq!(event.breakpoint_number(), Some(4));
        assert_eq!(event.file(), Some("/src/a.c"));
        assert_eq!(event.line(), Some(12));
        assert_eq!(event.stopped_threads(), StoppedThreads::List(vec![1, 3]));
    }

    #[test]
    fn test_stopped_threads_all() {
        let BackendEvent::SignalStop(event) =
            stop(r#"*stopped,reason="signal-received",thread-id="1",stopped-threads="all""#)
        else {
            panic!("expected signal stop");
        };
        assert_eq!(event.stopped_threads(), StoppedThreads::All);
    }

    #[test]
    fn test_thread_notice() {
        let record = parse_line(r#"=thread-created,id="7",group-id="i2",session-id="3",session-alias="worker""#);
        let notice = ThreadNotice::from_record(&record).unwrap();
        assert_eq!(notice.thread_id, 7);
        assert_eq!(notice.group_id.as_deref(), Some("i2"));
        assert_eq!(notice.session_id, Some(3));
        assert_eq!(notice.session_alias.as_deref(), Some("worker"));
    }
}
