//! Per-session breakpoint table
//!
//! A logical breakpoint is a source location. Each session it was requested
//! for gets its own physical breakpoint, tracked here so requests can be
//! diffed against what the debugger actually holds. Sessions succeed or fail
//! independently; a location accepted by only some sessions is normal.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::common::{Error, Result};
use crate::mi::{escape, Record, ResultClass};

use super::dialect::Dialect;
use super::events::{BackendEvent, OutputCategory};
use super::logpoint::{LogPointTracker, LogTemplate};

pub type SessionId = u32;

/// Anything that can run an MI command and hand back its reply
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Send one command; see [`crate::backend::Backend::send_command`]
    async fn send_command(&self, command: &str, suppress_failure: bool) -> Result<Record>;

    fn dialect(&self) -> Dialect {
        Dialect::Ddb
    }
}

/// `"<file>|||<line>"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointId {
    pub file: String,
    pub line: u32,
}

const ID_SEPARATOR: &str = "|||";

impl BreakpointId {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// Recover file and line from an id string
    pub fn parse(id: &str) -> Result<Self> {
        let (file, line) = id
            .rsplit_once(ID_SEPARATOR)
            .ok_or_else(|| Error::InvalidBreakpointId(id.to_string()))?;
        let line = line
            .parse()
            .map_err(|_| Error::InvalidBreakpointId(id.to_string()))?;
        Ok(Self::new(file, line))
    }
}

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.file, ID_SEPARATOR, self.line)
    }
}

/// What the host asked for at one location
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointSpec {
    pub file: String,
    pub line: u32,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub hit_condition: Option<String>,
    #[serde(default)]
    pub log_message: Option<String>,
}

impl BreakpointSpec {
    pub fn at(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            ..Self::default()
        }
    }

    pub fn id(&self) -> BreakpointId {
        BreakpointId::new(self.file.clone(), self.line)
    }

    /// Same condition, hit condition and log message
    pub fn same_options(&self, bp: &SingleBreakpoint) -> bool {
        non_empty(&self.condition) == non_empty(&bp.condition)
            && non_empty(&self.hit_condition) == non_empty(&bp.hit_condition)
            && non_empty(&self.log_message) == non_empty(&bp.log_message)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// One physical breakpoint inside one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SingleBreakpoint {
    /// Debugger-assigned breakpoint number
    pub id: u32,
    pub file: String,
    pub line: u32,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
    pub session_id: SessionId,
    pub verified: bool,
}

/// A source location and the sessions holding a breakpoint there
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    pub file: String,
    pub line: u32,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
    pub session_ids: Vec<SessionId>,
}

impl Breakpoint {
    pub fn id(&self) -> BreakpointId {
        BreakpointId::new(self.file.clone(), self.line)
    }

    pub fn verified(&self) -> bool {
        !self.session_ids.is_empty()
    }

    fn from_spec(spec: &BreakpointSpec, session_ids: Vec<SessionId>) -> Self {
        Self {
            file: spec.file.clone(),
            line: spec.line,
            condition: spec.condition.clone(),
            hit_condition: spec.hit_condition.clone(),
            log_message: spec.log_message.clone(),
            session_ids,
        }
    }

    fn from_sessions(id: &BreakpointId, sessions: &BTreeMap<SessionId, SingleBreakpoint>) -> Self {
        let first = sessions.values().next();
        Self {
            file: id.file.clone(),
            line: id.line,
            condition: first.and_then(|b| b.condition.clone()),
            hit_condition: first.and_then(|b| b.hit_condition.clone()),
            log_message: first.and_then(|b| b.log_message.clone()),
            session_ids: sessions.keys().copied().collect(),
        }
    }
}

/// A breakpoint on a function name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionBreakpointSpec {
    pub name: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub hit_condition: Option<String>,
}

/// A function breakpoint and the sessions that resolved it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionBreakpoint {
    pub name: String,
    pub verified: bool,
    /// Where the first accepting session resolved the function
    pub file: Option<String>,
    pub line: Option<u32>,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub session_ids: Vec<SessionId>,
}

/// One session's physical breakpoint for a function
#[derive(Debug, Clone, PartialEq, Eq)]
struct PlacedFunction {
    number: u32,
    spec: FunctionBreakpointSpec,
    file: Option<String>,
    line: Option<u32>,
}

/// Parsed hit-count condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitCondition {
    /// `>N`: ignore the first N hits
    IgnoreFirst(u32),
    /// `N`: temporary breakpoint that triggers after N hits
    AfterCount(u32),
    /// Anything else; inserted as a plain temporary breakpoint
    Invalid(String),
}

impl HitCondition {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let parsed = match text.strip_prefix('>') {
            Some(n) => n.trim().parse().map(Self::IgnoreFirst),
            None => text.parse().map(Self::AfterCount),
        };
        Some(parsed.unwrap_or_else(|_| Self::Invalid(text.to_string())))
    }

    /// Flags for `break-insert`, with a trailing space when non-empty
    pub fn insert_flags(&self) -> String {
        match self {
            Self::IgnoreFirst(n) => format!("-i {n} "),
            Self::AfterCount(0) => String::new(),
            Self::AfterCount(n) => format!("-t -i {n} "),
            Self::Invalid(_) => "-t ".to_string(),
        }
    }
}

type Table = BTreeMap<BreakpointId, BTreeMap<SessionId, SingleBreakpoint>>;
type FunctionTable = BTreeMap<String, BTreeMap<SessionId, PlacedFunction>>;

/// Owns the breakpoint table of one backend
pub struct BreakpointCoordinator {
    table: Mutex<Table>,
    functions: Mutex<FunctionTable>,
    logpoints: Arc<Mutex<LogPointTracker>>,
    diagnostics: mpsc::UnboundedSender<BackendEvent>,
}

impl BreakpointCoordinator {
    pub fn new(
        logpoints: Arc<Mutex<LogPointTracker>>,
        diagnostics: mpsc::UnboundedSender<BackendEvent>,
    ) -> Self {
        Self {
            table: Mutex::new(Table::new()),
            functions: Mutex::new(FunctionTable::new()),
            logpoints,
            diagnostics,
        }
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn function_table(&self) -> MutexGuard<'_, FunctionTable> {
        self.functions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn logpoints(&self) -> MutexGuard<'_, LogPointTracker> {
        self.logpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn diagnostic(&self, text: String) {
        let _ = self
            .diagnostics
            .send(BackendEvent::output(OutputCategory::Stderr, text));
    }

    /// Insert `spec` into every session in `sessions` concurrently
    ///
    /// The returned breakpoint lists only the sessions that accepted it.
    #[tracing::instrument(skip(self, sink, spec), fields(file = %spec.file, line = spec.line))]
    pub async fn add_breakpoint(
        &self,
        sink: &dyn CommandSink,
        spec: &BreakpointSpec,
        sessions: &[SessionId],
    ) -> Breakpoint {
        let placement = sink.dialect().placement(sessions);
        let sessions = placement.as_slice();
        let results = join_all(
            sessions
                .iter()
                .map(|&session| self.add_single_breakpoint(sink, spec, session)),
        )
        .await;

        let mut accepted = Vec::new();
        for (session, result) in sessions.iter().zip(results) {
            match result {
                Ok(bp) => accepted.push(bp.session_id),
                Err(e) => {
                    tracing::warn!(session, error = %e, "Breakpoint not set in session");
                    self.diagnostic(format!("{e}\n"));
                }
            }
        }
        Breakpoint::from_spec(spec, accepted)
    }

    /// Insert `spec` into one session; reuses an existing breakpoint there
    pub async fn add_single_breakpoint(
        &self,
        sink: &dyn CommandSink,
        spec: &BreakpointSpec,
        session: SessionId,
    ) -> Result<SingleBreakpoint> {
        let id = spec.id();
        if let Some(existing) = self.single(&id, session) {
            tracing::debug!(%id, session, number = existing.id, "Reusing breakpoint");
            return Ok(existing);
        }

        let location = format!("{}:{}", spec.file, spec.line);
        let (number, _) = self
            .insert(sink, non_empty(&spec.hit_condition), &location, session)
            .await?;

        let switch = sink.dialect().session_switch(session);
        if let Err(e) = self.configure(sink, spec, number, &switch).await {
            self.delete_orphan(sink, number, &switch).await;
            return Err(Error::breakpoint_rejected(&location, session, &e.to_string()));
        }

        let bp = SingleBreakpoint {
            id: number,
            file: spec.file.clone(),
            line: spec.line,
            condition: spec.condition.clone(),
            hit_condition: spec.hit_condition.clone(),
            log_message: spec.log_message.clone(),
            session_id: session,
            verified: true,
        };

        // Another request may have placed the same breakpoint while ours was in flight
        let raced = {
            let mut table = self.table();
            let placed = table.entry(id).or_default();
            match placed.get(&session) {
                Some(existing) => Some(existing.clone()),
                None => {
                    placed.insert(session, bp.clone());
                    None
                }
            }
        };
        if let Some(existing) = raced {
            tracing::debug!(number, session, kept = existing.id, "Dropping duplicate breakpoint");
            self.delete_orphan(sink, number, &switch).await;
            return Ok(existing);
        }

        if let Some(message) = non_empty(&spec.log_message) {
            self.logpoints().register(session, number, message);
        }
        tracing::debug!(number, session, location = %location, "Breakpoint inserted");
        Ok(bp)
    }

    /// `break-insert` at `location` in one session
    ///
    /// Returns the new breakpoint number and the reply it came in.
    async fn insert(
        &self,
        sink: &dyn CommandSink,
        hit_condition: Option<&str>,
        location: &str,
        session: SessionId,
    ) -> Result<(u32, Record)> {
        let switch = sink.dialect().session_switch(session);
        let flags = self.count_flags(hit_condition);

        let insert = format!("break-insert -f {flags}\"{}\"{switch}", escape(location));
        let reply = sink.send_command(&insert, true).await?;
        if !reply.is_class(ResultClass::Done) {
            let reason = reply.result_str("msg").unwrap_or("insert failed");
            return Err(Error::breakpoint_rejected(location, session, reason));
        }
        let number: u32 = reply
            .result_str("bkpt.number")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| Error::unexpected_reply(&insert, "missing bkpt.number"))?;
        Ok((number, reply))
    }

    /// `break-insert` flags for a hit condition
    fn count_flags(&self, hit_condition: Option<&str>) -> String {
        match hit_condition.and_then(HitCondition::parse) {
            Some(HitCondition::Invalid(text)) => {
                tracing::warn!(hit_condition = %text, "Invalid count condition");
                self.diagnostic(format!(
                    "Invalid count condition '{text}', expected '>N' or 'N'. Using a temporary breakpoint.\n"
                ));
                HitCondition::Invalid(text).insert_flags()
            }
            Some(cond) => cond.insert_flags(),
            None => String::new(),
        }
    }

    /// Best-effort delete of a breakpoint nothing tracks
    async fn delete_orphan(&self, sink: &dyn CommandSink, number: u32, switch: &str) {
        let delete = format!("break-delete {number}{switch}");
        if let Err(e) = sink.send_command(&delete, true).await {
            tracing::warn!(number, error = %e, "Could not delete untracked breakpoint");
        }
    }

    /// Condition and log-point sub-commands after a successful insert
    async fn configure(
        &self,
        sink: &dyn CommandSink,
        spec: &BreakpointSpec,
        number: u32,
        switch: &str,
    ) -> Result<()> {
        if let Some(condition) = non_empty(&spec.condition) {
            set_condition(sink, number, condition, switch).await?;
        }
        if let Some(message) = non_empty(&spec.log_message) {
            let prints = LogTemplate::parse(message).print_commands();
            if !prints.is_empty() {
                let command = format!("break-commands {number} {}{switch}", prints.join(" "));
                expect_done(sink, &command).await?;
            }
        }
        Ok(())
    }

    /// Replace every function breakpoint with `specs`
    ///
    /// Entries for names or sessions no longer requested, or whose options
    /// changed, are deleted; matching entries are reused.
    #[tracing::instrument(skip(self, sink, specs), fields(count = specs.len()))]
    pub async fn set_function_breakpoints(
        &self,
        sink: &dyn CommandSink,
        specs: &[FunctionBreakpointSpec],
        sessions: &[SessionId],
    ) -> Result<Vec<FunctionBreakpoint>> {
        let sessions = sink.dialect().placement(sessions);

        let mut stale = Vec::new();
        for (name, placed) in self.function_table().iter() {
            for (session, entry) in placed {
                if !sessions.contains(session) || !specs.contains(&entry.spec) {
                    stale.push((name.clone(), *session, entry.number));
                }
            }
        }
        let removed = join_all(
            stale
                .iter()
                .map(|(name, session, number)| self.remove_function(sink, name, *session, *number)),
        )
        .await;
        removed.into_iter().collect::<Result<Vec<_>>>()?;

        let added = join_all(
            specs
                .iter()
                .map(|spec| self.add_function_breakpoint(sink, spec, &sessions)),
        )
        .await;
        Ok(added)
    }

    async fn add_function_breakpoint(
        &self,
        sink: &dyn CommandSink,
        spec: &FunctionBreakpointSpec,
        sessions: &[SessionId],
    ) -> FunctionBreakpoint {
        let results = join_all(
            sessions
                .iter()
                .map(|&session| self.add_single_function(sink, spec, session)),
        )
        .await;

        let mut accepted = Vec::new();
        let mut resolved: Option<PlacedFunction> = None;
        for (session, result) in sessions.iter().zip(results) {
            match result {
                Ok(placed) => {
                    accepted.push(*session);
                    if resolved.is_none() {
                        resolved = Some(placed);
                    }
                }
                Err(e) => {
                    tracing::warn!(session, error = %e, "Function breakpoint not set in session");
                    self.diagnostic(format!("{e}\n"));
                }
            }
        }
        FunctionBreakpoint {
            name: spec.name.clone(),
            verified: !accepted.is_empty(),
            file: resolved.as_ref().and_then(|p| p.file.clone()),
            line: resolved.as_ref().and_then(|p| p.line),
            condition: spec.condition.clone(),
            hit_condition: spec.hit_condition.clone(),
            session_ids: accepted,
        }
    }

    async fn add_single_function(
        &self,
        sink: &dyn CommandSink,
        spec: &FunctionBreakpointSpec,
        session: SessionId,
    ) -> Result<PlacedFunction> {
        let existing = self
            .function_table()
            .get(&spec.name)
            .and_then(|placed| placed.get(&session))
            .cloned();
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let (number, reply) = self
            .insert(sink, non_empty(&spec.hit_condition), &spec.name, session)
            .await?;
        let switch = sink.dialect().session_switch(session);
        if let Some(condition) = non_empty(&spec.condition) {
            if let Err(e) = set_condition(sink, number, condition, &switch).await {
                self.delete_orphan(sink, number, &switch).await;
                return Err(Error::breakpoint_rejected(&spec.name, session, &e.to_string()));
            }
        }

        let placed = PlacedFunction {
            number,
            spec: spec.clone(),
            file: reply
                .result_str("bkpt.fullname")
                .or_else(|| reply.result_str("bkpt.file"))
                .map(str::to_string),
            line: reply.result_str("bkpt.line").and_then(|l| l.parse().ok()),
        };

        let raced = {
            let mut table = self.function_table();
            let entries = table.entry(spec.name.clone()).or_default();
            match entries.get(&session) {
                Some(existing) => Some(existing.clone()),
                None => {
                    entries.insert(session, placed.clone());
                    None
                }
            }
        };
        if let Some(existing) = raced {
            self.delete_orphan(sink, number, &switch).await;
            return Ok(existing);
        }
        tracing::debug!(number, session, function = %spec.name, "Function breakpoint inserted");
        Ok(placed)
    }

    async fn remove_function(
        &self,
        sink: &dyn CommandSink,
        name: &str,
        session: SessionId,
        number: u32,
    ) -> Result<()> {
        let command = format!("break-delete {number}{}", sink.dialect().session_switch(session));
        expect_done(sink, &command).await?;

        let mut table = self.function_table();
        if let Some(placed) = table.get_mut(name) {
            placed.remove(&session);
            if placed.is_empty() {
                table.remove(name);
            }
        }
        Ok(())
    }

    /// Tracked function names and the sessions holding each
    pub fn function_breakpoints(&self) -> Vec<(String, Vec<SessionId>)> {
        self.function_table()
            .iter()
            .map(|(name, placed)| (name.clone(), placed.keys().copied().collect()))
            .collect()
    }

    /// Delete the breakpoint at `id` in every session holding it
    pub async fn remove_breakpoint(&self, sink: &dyn CommandSink, id: &BreakpointId) -> Result<()> {
        let sessions: Vec<SessionId> = self
            .table()
            .get(id)
            .map(|s| s.keys().copied().collect())
            .unwrap_or_default();

        let results = join_all(
            sessions
                .iter()
                .map(|&session| self.remove_single_breakpoint(sink, id, session)),
        )
        .await;
        results.into_iter().find(Result::is_err).unwrap_or(Ok(false)).map(|_| ())
    }

    /// Delete one session's breakpoint at `id`
    ///
    /// Returns `false` when nothing was tracked there.
    pub async fn remove_single_breakpoint(
        &self,
        sink: &dyn CommandSink,
        id: &BreakpointId,
        session: SessionId,
    ) -> Result<bool> {
        let Some(bp) = self.single(id, session) else {
            return Ok(false);
        };

        let command = format!("break-delete {}{}", bp.id, sink.dialect().session_switch(session));
        let reply = sink.send_command(&command, true).await?;
        if !reply.is_class(ResultClass::Done) {
            return Err(Error::command_failed(
                &command,
                reply.result_str("msg").unwrap_or("delete failed"),
            ));
        }

        {
            let mut table = self.table();
            if let Some(sessions) = table.get_mut(id) {
                sessions.remove(&session);
                if sessions.is_empty() {
                    table.remove(id);
                }
            }
        }
        if bp.log_message.is_some() {
            self.logpoints().unregister(session, bp.id);
        }
        Ok(true)
    }

    /// Remove every breakpoint whose file starts with `prefix`
    ///
    /// Returns how many physical breakpoints were deleted.
    pub async fn clear_breakpoints(&self, sink: &dyn CommandSink, prefix: &str) -> Result<usize> {
        let targets: Vec<(BreakpointId, SessionId)> = self
            .table()
            .iter()
            .filter(|(id, _)| id.file.starts_with(prefix))
            .flat_map(|(id, sessions)| sessions.keys().map(move |s| (id.clone(), *s)))
            .collect();

        let results = join_all(
            targets
                .iter()
                .map(|(id, session)| self.remove_single_breakpoint(sink, id, *session)),
        )
        .await;

        let mut removed = 0;
        for result in results {
            if result? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn single(&self, id: &BreakpointId, session: SessionId) -> Option<SingleBreakpoint> {
        self.table().get(id).and_then(|s| s.get(&session)).cloned()
    }

    /// Sessions and physical breakpoints at one location
    pub fn sessions_at(&self, id: &BreakpointId) -> Vec<SingleBreakpoint> {
        self.table()
            .get(id)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, id: &BreakpointId) -> Option<Breakpoint> {
        self.table()
            .get(id)
            .map(|sessions| Breakpoint::from_sessions(id, sessions))
    }

    /// Every tracked logical breakpoint, ordered by file then line
    pub fn list(&self) -> Vec<Breakpoint> {
        self.table()
            .iter()
            .map(|(id, sessions)| Breakpoint::from_sessions(id, sessions))
            .collect()
    }

    /// Tracked lines in exactly `file`
    pub fn lines_in(&self, file: &str) -> Vec<u32> {
        self.table()
            .keys()
            .filter(|id| id.file == file)
            .map(|id| id.line)
            .collect()
    }
}

async fn set_condition(sink: &dyn CommandSink, number: u32, condition: &str, switch: &str) -> Result<()> {
    expect_done(sink, &format!("break-condition {number} {condition}{switch}")).await
}

async fn expect_done(sink: &dyn CommandSink, command: &str) -> Result<()> {
    let reply = sink.send_command(command, true).await?;
    if reply.is_class(ResultClass::Done) {
        Ok(())
    } else {
        Err(Error::command_failed(
            command,
            reply.result_str("msg").unwrap_or("command failed"),
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mi::parse_line;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Answers break-* commands; sessions in `failing` reject inserts
    pub(crate) struct FakeSink {
        pub commands: Mutex<Vec<String>>,
        pub failing: Vec<SessionId>,
        pub fail_condition: bool,
        pub dialect: Dialect,
        next_number: AtomicU32,
    }

    impl FakeSink {
        pub(crate) fn new(failing: Vec<SessionId>) -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
                failing,
                fail_condition: false,
                dialect: Dialect::Ddb,
                next_number: AtomicU32::new(1),
            }
        }

        pub(crate) fn sent(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.sent().iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    #[async_trait]
    impl CommandSink for FakeSink {
        async fn send_command(&self, command: &str, _suppress_failure: bool) -> Result<Record> {
            self.commands.lock().unwrap().push(command.to_string());
            let fails = self
                .failing
                .iter()
                .any(|s| command.ends_with(&format!("--session {s}")));
            let reply = if command.starts_with("break-insert") {
                if fails {
                    r#"1^error,msg="No symbol table is loaded.""#.to_string()
                } else {
                    let n = self.next_number.fetch_add(1, Ordering::SeqCst);
                    format!(r#"1^done,bkpt={{number="{n}",type="breakpoint"}}"#)
                }
            } else if command.starts_with("break-condition") && self.fail_condition {
                r#"1^error,msg="bad condition""#.to_string()
            } else {
                "1^done".to_string()
            };
            // Let concurrent requests interleave like they do over a pipe
            tokio::task::yield_now().await;
            Ok(parse_line(&reply))
        }

        fn dialect(&self) -> Dialect {
            self.dialect
        }
    }

    fn coordinator() -> (BreakpointCoordinator, mpsc::UnboundedReceiver<BackendEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            BreakpointCoordinator::new(Arc::new(Mutex::new(LogPointTracker::default())), tx),
            rx,
        )
    }

    #[test]
    fn test_breakpoint_id_round_trip() {
        let id = BreakpointId::new("/src/a|b.c", 42);
        assert_eq!(id.to_string(), "/src/a|b.c|||42");
        assert_eq!(BreakpointId::parse(&id.to_string()).unwrap(), id);
        assert!(BreakpointId::parse("no-separator").is_err());
    }

    #[test]
    fn test_hit_condition_flags() {
        assert_eq!(HitCondition::parse(">3").unwrap().insert_flags(), "-i 3 ");
        assert_eq!(HitCondition::parse("5").unwrap().insert_flags(), "-t -i 5 ");
        assert_eq!(HitCondition::parse("0").unwrap().insert_flags(), "");
        assert_eq!(
            HitCondition::parse("abc"),
            Some(HitCondition::Invalid("abc".into()))
        );
        assert_eq!(HitCondition::parse("abc").unwrap().insert_flags(), "-t ");
        assert_eq!(HitCondition::parse("  "), None);
    }

    #[tokio::test]
    async fn test_single_insert_is_idempotent() {
        let (coord, _rx) = coordinator();
        let sink = FakeSink::new(vec![]);
        let spec = BreakpointSpec::at("/src/main.c", 10);

        let first = coord.add_single_breakpoint(&sink, &spec, 1).await.unwrap();
        let second = coord.add_single_breakpoint(&sink, &spec, 1).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(sink.count("break-insert"), 1);
        assert_eq!(sink.sent()[0], "break-insert -f \"/src/main.c:10\" --session 1");
    }

    #[tokio::test]
    async fn test_partial_success_keeps_accepting_sessions() {
        let (coord, mut rx) = coordinator();
        let sink = FakeSink::new(vec![2]);
        let spec = BreakpointSpec::at("/src/main.c", 10);

        let bp = coord.add_breakpoint(&sink, &spec, &[1, 2, 3]).await;
        assert_eq!(bp.session_ids, vec![1, 3]);
        assert_eq!(coord.sessions_at(&spec.id()).len(), 2);
        assert!(coord.single(&spec.id(), 2).is_none());
        assert!(matches!(
            rx.try_recv(),
            Ok(BackendEvent::Output { category: OutputCategory::Stderr, .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_count_condition_degrades_to_temporary() {
        let (coord, mut rx) = coordinator();
        let sink = FakeSink::new(vec![]);
        let spec = BreakpointSpec {
            hit_condition: Some("abc".into()),
            ..BreakpointSpec::at("a.c", 3)
        };

        coord.add_single_breakpoint(&sink, &spec, 1).await.unwrap();
        assert_eq!(sink.sent()[0], "break-insert -f -t \"a.c:3\" --session 1");
        match rx.try_recv() {
            Ok(BackendEvent::Output { text, .. }) => assert!(text.contains("Invalid count condition")),
            other => panic!("expected diagnostic, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_condition_and_logpoint_subcommands() {
        let (coord, _rx) = coordinator();
        let sink = FakeSink::new(vec![]);
        let spec = BreakpointSpec {
            condition: Some("i > 3".into()),
            hit_condition: Some(">2".into()),
            log_message: Some("i={i}".into()),
            ..BreakpointSpec::at("a.c", 7)
        };

        coord.add_single_breakpoint(&sink, &spec, 4).await.unwrap();
        assert_eq!(
            sink.sent(),
            vec![
                "break-insert -f -i 2 \"a.c:7\" --session 4".to_string(),
                "break-condition 1 i > 3 --session 4".to_string(),
                "break-commands 1 \"print i\" --session 4".to_string(),
            ]
        );
        assert!(!coord.logpoints().is_empty());
    }

    #[tokio::test]
    async fn test_failed_condition_deletes_orphan() {
        let (coord, _rx) = coordinator();
        let mut sink = FakeSink::new(vec![]);
        sink.fail_condition = true;
        let spec = BreakpointSpec {
            condition: Some("bogus(".into()),
            ..BreakpointSpec::at("a.c", 7)
        };

        let err = coord.add_single_breakpoint(&sink, &spec, 1).await.unwrap_err();
        assert!(matches!(err, Error::BreakpointRejected { session_id: 1, .. }));
        assert_eq!(sink.sent().last().unwrap(), "break-delete 1 --session 1");
        assert!(coord.list().is_empty());
    }

    #[tokio::test]
    async fn test_remove_drops_empty_location() {
        let (coord, _rx) = coordinator();
        let sink = FakeSink::new(vec![]);
        let spec = BreakpointSpec::at("a.c", 1);
        coord.add_breakpoint(&sink, &spec, &[1, 2]).await;

        assert!(coord.remove_single_breakpoint(&sink, &spec.id(), 1).await.unwrap());
        assert_eq!(coord.get(&spec.id()).unwrap().session_ids, vec![2]);
        assert!(!coord.remove_single_breakpoint(&sink, &spec.id(), 1).await.unwrap());

        coord.remove_breakpoint(&sink, &spec.id()).await.unwrap();
        assert!(coord.get(&spec.id()).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_inserts_keep_one() {
        let (coord, _rx) = coordinator();
        let sink = FakeSink::new(vec![]);
        let spec = BreakpointSpec::at("a.c", 5);

        let (first, second) = tokio::join!(
            coord.add_single_breakpoint(&sink, &spec, 1),
            coord.add_single_breakpoint(&sink, &spec, 1)
        );
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(sink.count("break-insert"), 2);
        assert_eq!(coord.sessions_at(&spec.id()).len(), 1);

        // The loser deletes its own copy
        let kept = coord.single(&spec.id(), 1).unwrap().id;
        let dropped = if kept == 1 { 2 } else { 1 };
        assert_eq!(
            sink.sent().last().unwrap(),
            &format!("break-delete {dropped} --session 1")
        );
    }

    #[tokio::test]
    async fn test_unscoped_dialect_inserts_once() {
        let (coord, _rx) = coordinator();
        let mut sink = FakeSink::new(vec![]);
        sink.dialect = Dialect::Gdb;
        let spec = BreakpointSpec::at("a.c", 3);

        let bp = coord.add_breakpoint(&sink, &spec, &[1, 2, 3]).await;
        assert_eq!(sink.sent(), vec!["break-insert -f \"a.c:3\"".to_string()]);
        assert_eq!(bp.session_ids, vec![crate::backend::dialect::ALL_SESSIONS]);

        coord.add_breakpoint(&sink, &spec, &[2]).await;
        assert_eq!(sink.count("break-insert"), 1);
        assert_eq!(coord.sessions_at(&spec.id()).len(), 1);
    }

    #[tokio::test]
    async fn test_function_breakpoints_per_session() {
        let (coord, _rx) = coordinator();
        let sink = FakeSink::new(vec![2]);
        let main = FunctionBreakpointSpec {
            name: "main".into(),
            condition: Some("argc > 1".into()),
            hit_condition: Some(">2".into()),
        };

        let set = coord
            .set_function_breakpoints(&sink, &[main.clone()], &[1, 2])
            .await
            .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].session_ids, vec![1]);
        assert!(set[0].verified);
        let sent = sink.sent();
        assert!(sent.contains(&"break-insert -f -i 2 \"main\" --session 1".to_string()));
        assert!(sent.contains(&"break-insert -f -i 2 \"main\" --session 2".to_string()));
        assert!(sent.contains(&"break-condition 1 argc > 1 --session 1".to_string()));

        // Unchanged request reuses what is there
        coord
            .set_function_breakpoints(&sink, &[main], &[1])
            .await
            .unwrap();
        assert_eq!(sink.count("break-insert"), 2);
        assert_eq!(coord.function_breakpoints(), vec![("main".to_string(), vec![1])]);

        // Dropping the name deletes it
        let set = coord.set_function_breakpoints(&sink, &[], &[1]).await.unwrap();
        assert!(set.is_empty());
        assert_eq!(sink.sent().last().unwrap(), "break-delete 1 --session 1");
        assert!(coord.function_breakpoints().is_empty());
    }

    #[tokio::test]
    async fn test_changed_function_options_reinsert() {
        let (coord, _rx) = coordinator();
        let sink = FakeSink::new(vec![]);
        let plain = FunctionBreakpointSpec {
            name: "work".into(),
            ..Default::default()
        };
        coord.set_function_breakpoints(&sink, &[plain], &[1]).await.unwrap();

        let counted = FunctionBreakpointSpec {
            name: "work".into(),
            hit_condition: Some("3".into()),
            ..Default::default()
        };
        coord.set_function_breakpoints(&sink, &[counted], &[1]).await.unwrap();
        assert_eq!(
            sink.sent(),
            vec![
                "break-insert -f \"work\" --session 1".to_string(),
                "break-delete 1 --session 1".to_string(),
                "break-insert -f -t -i 3 \"work\" --session 1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_clear_by_prefix() {
        let (coord, _rx) = coordinator();
        let sink = FakeSink::new(vec![]);
        coord.add_breakpoint(&sink, &BreakpointSpec::at("/proj/a.c", 1), &[1, 2]).await;
        coord.add_breakpoint(&sink, &BreakpointSpec::at("/proj/sub/b.c", 2), &[1]).await;
        coord.add_breakpoint(&sink, &BreakpointSpec::at("/other/c.c", 3), &[1]).await;

        assert_eq!(coord.clear_breakpoints(&sink, "/proj").await.unwrap(), 3);
        let remaining = coord.list();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].file, "/other/c.c");
        assert_eq!(coord.lines_in("/other/c.c"), vec![3]);
    }
}
