//! Debug session orchestrator
//!
//! Translates host requests into backend and breakpoint-coordinator calls,
//! and backend events into host events. Owns everything that is per
//! session: thread bookkeeping, variable references, goto targets.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc;

use crate::backend::{
    Backend, BackendEvent, BreakpointId, FunctionBreakpoint, FunctionBreakpointSpec, LaunchOptions,
    OutputCategory, Readiness, ThreadNotice,
};
use crate::common::config::{resolve_executable, Config, StopAtEntry};
use crate::common::{Error, Result};
use crate::mi::{expand, handle, FrameRef, Value, VariableObject};
use crate::registry::{HttpRegistry, SessionRegistry};

use super::protocol::{
    EvaluateContext, EvaluateResult, GotoTarget, HostBreakpoint, HostEvent, LaunchArgs, RunMode,
    Scope, SourceBreakpoint, StackFrame, StoppedEvent, Thread, ThreadReason, Variable,
};
use super::stops;
use super::variables::{self, HandleTable, ScopeKind, VarRef};

/// Feature flag for `exec-run --start`
const RUN_START_FEATURE: &str = "exec-run-start-option";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Backend up, waiting for configuration to finish
    Configuring,
    Running,
    Stopped,
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuring => write!(f, "configuring"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Orchestrator behaviour chosen at launch
#[derive(Debug, Clone)]
pub struct Behaviour {
    pub run_mode: RunMode,
    pub stop_at_entry: StopAtEntry,
    pub var_objects: bool,
    pub interrupt_on_breakpoint: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            run_mode: RunMode::None,
            stop_at_entry: StopAtEntry::default(),
            var_objects: true,
            interrupt_on_breakpoint: true,
        }
    }
}

/// Launch settings merged from the config file and the launch request
pub struct SessionOptions {
    pub launch: LaunchOptions,
    pub behaviour: Behaviour,
    pub registry: Option<Arc<dyn SessionRegistry>>,
}

impl SessionOptions {
    pub fn resolve(config: &Config, args: &LaunchArgs) -> Result<Self> {
        let program = match &args.debugger {
            Some(path) => resolve_executable(Path::new(path))?,
            None => config.debugger.resolve_path()?,
        };

        let registry: Option<Arc<dyn SessionRegistry>> = if config.registry.enabled {
            Some(Arc::new(HttpRegistry::new(config.registry.url.clone())?))
        } else {
            None
        };

        let mut debugger_args = config.debugger.args.clone();
        debugger_args.extend(args.args.iter().cloned());

        let launch = LaunchOptions {
            program,
            args: debugger_args,
            dialect: args.dialect.unwrap_or(config.debugger.dialect),
            init_commands: config.debugger.init_commands.clone(),
            keepalive: config.debugger.keepalive(),
            detach_timeout: config.debugger.detach_timeout(),
            readiness: registry.clone().map(|registry| Readiness {
                registry,
                interval: config.registry.poll_interval(),
                max_attempts: config.registry.max_attempts,
            }),
        };

        let behaviour = Behaviour {
            run_mode: args.run_mode.unwrap_or(config.session.run_mode),
            stop_at_entry: args
                .stop_at_entry
                .clone()
                .unwrap_or_else(|| config.session.stop_at_entry.clone()),
            var_objects: args.var_objects.unwrap_or(config.session.var_objects),
            interrupt_on_breakpoint: args
                .interrupt_on_breakpoint
                .unwrap_or(config.session.interrupt_on_breakpoint),
        };

        Ok(Self {
            launch,
            behaviour,
            registry,
        })
    }
}

#[derive(Debug, Clone)]
struct ThreadRecord {
    name: String,
    group_id: Option<String>,
    session_id: Option<u32>,
}

impl ThreadRecord {
    fn from_notice(notice: &ThreadNotice) -> Self {
        let name = match notice.session_id {
            Some(sid) => {
                let alias = notice
                    .session_alias
                    .clone()
                    .unwrap_or_else(|| sid.to_string());
                format!("[{alias}]: Thread {}, sid = {sid}", notice.thread_id)
            }
            None => format!("Thread {}", notice.thread_id),
        };
        Self {
            name,
            group_id: notice.group_id.clone(),
            session_id: notice.session_id,
        }
    }
}

/// Result of a breakpoint reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// Breakpoints of the requested file, one per requested line
    pub file: Vec<HostBreakpoint>,
    /// Every tracked breakpoint after the change
    pub all: Vec<HostBreakpoint>,
}

/// What the debugger reported for one variable object
enum Refresh {
    /// `var-update` changelist of a known object
    Updated(Vec<Value>),
    Created(VariableObject),
}

/// Ask the debugger about variable object `name`
///
/// A known object is updated; one the debugger has dropped, or one never
/// created, is created from `expression`.
async fn fetch_object(
    backend: &Backend,
    known: bool,
    name: &str,
    expression: &str,
    frame: FrameRef,
) -> Result<Refresh> {
    let thread = i64::from(frame.thread_id);
    if known {
        match backend.var_update(name, thread, frame.level).await {
            Ok(changes) => return Ok(Refresh::Updated(changes)),
            Err(Error::Command { message, .. }) if variables::is_missing_object(&message) => {
                tracing::debug!(name, "Variable object gone, recreating");
            }
            Err(e) => return Err(e),
        }
    }

    let mut var = backend
        .var_create(name, expression, thread, frame.level)
        .await?;
    var.display_name = expression.to_string();
    var.expression = expression.to_string();
    Ok(Refresh::Created(var))
}

/// Events telling the host that the debugger never came up
pub fn launch_failure_events(error: &Error) -> Vec<HostEvent> {
    vec![
        HostEvent::Output {
            category: OutputCategory::Stderr,
            output: "Could not start debugger process, does the program exist?\n".to_string(),
        },
        HostEvent::Output {
            category: OutputCategory::Stderr,
            output: format!("{error}\n"),
        },
        HostEvent::Terminated,
    ]
}

pub struct DebugSession {
    backend: Backend,
    events_rx: mpsc::UnboundedReceiver<BackendEvent>,
    registry: Option<Arc<dyn SessionRegistry>>,
    behaviour: Behaviour,
    state: SessionState,
    threads: BTreeMap<i64, ThreadRecord>,
    handles: HandleTable,
    goto_targets: HashMap<i64, (String, u32)>,
    quit: bool,
}

impl DebugSession {
    /// Start the debugger and wrap it in a session
    #[tracing::instrument(skip(options), fields(program = %options.launch.program.display()))]
    pub async fn launch(options: SessionOptions) -> Result<Self> {
        let backend = Backend::launch(&options.launch).await?;
        let session = Self::new(backend, options.behaviour, options.registry)?;
        if let Err(e) = session.backend.list_features().await {
            tracing::warn!(error = %e, "Could not list debugger features");
        }
        Ok(session)
    }

    pub fn new(
        mut backend: Backend,
        behaviour: Behaviour,
        registry: Option<Arc<dyn SessionRegistry>>,
    ) -> Result<Self> {
        let events_rx = backend
            .take_event_receiver()
            .ok_or_else(|| Error::Internal("Backend event receiver already taken".to_string()))?;
        Ok(Self {
            backend,
            events_rx,
            registry,
            behaviour,
            state: SessionState::Configuring,
            threads: BTreeMap::new(),
            handles: HandleTable::new(),
            goto_targets: HashMap::new(),
            quit: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Next event from the backend; `None` once the backend is gone
    pub async fn next_event(&mut self) -> Option<BackendEvent> {
        self.events_rx.recv().await
    }

    // === Events ===

    /// Host events for one backend event
    pub async fn handle_event(&mut self, event: BackendEvent) -> Vec<HostEvent> {
        tracing::trace!(?event, "Backend event");

        if let Some((reason, stop)) = stops::classify(&event) {
            if self.quit {
                return Vec::new();
            }
            self.state = SessionState::Stopped;

            let mut hit_ids = Vec::new();
            let mut breakpoint_hit = None;
            if let BackendEvent::BreakpointHit(stop) = &event {
                let file = stop.file().map(str::to_string);
                let line = stop.line();
                if let (Some(file), Some(line)) = (&file, line) {
                    hit_ids.push(BreakpointId::new(file.clone(), line).to_string());
                }
                breakpoint_hit = Some(HostEvent::BreakpointHit {
                    session_id: stop.session_id(),
                    file,
                    line,
                });
            }

            let mut events: Vec<HostEvent> = stops::fan_out(reason, stop, hit_ids)
                .into_iter()
                .map(HostEvent::Stopped)
                .collect();
            if let Some(hit) = breakpoint_hit {
                events.push(hit);
                if self.behaviour.interrupt_on_breakpoint {
                    if let Err(e) = self.backend.interrupt(None).await {
                        tracing::warn!(error = %e, "Could not interrupt sessions after breakpoint");
                    }
                }
            }
            return events;
        }

        match event {
            BackendEvent::Ready => {
                self.state = SessionState::Configuring;
                vec![HostEvent::Initialized]
            }
            BackendEvent::Output { category, text } => vec![HostEvent::Output {
                category,
                output: text,
            }],
            BackendEvent::Running(notice) => {
                if self.quit {
                    return Vec::new();
                }
                self.state = SessionState::Running;
                self.handles.forget_expressions();
                vec![HostEvent::Continued {
                    thread_id: notice.thread_id,
                    all_threads_continued: notice.thread_id.is_none(),
                }]
            }
            BackendEvent::ThreadCreated(notice) => {
                self.threads
                    .insert(notice.thread_id, ThreadRecord::from_notice(&notice));
                vec![HostEvent::Thread {
                    reason: ThreadReason::Started,
                    thread_id: notice.thread_id,
                }]
            }
            BackendEvent::ThreadExited(notice) => {
                self.threads.remove(&notice.thread_id);
                vec![HostEvent::Thread {
                    reason: ThreadReason::Exited,
                    thread_id: notice.thread_id,
                }]
            }
            BackendEvent::Quit { code } => self.quit_events(code),
            // Stops were classified above
            BackendEvent::BreakpointHit(_)
            | BackendEvent::Watchpoint(_)
            | BackendEvent::StepEnd(_)
            | BackendEvent::SignalStop(_)
            | BackendEvent::Stopped(_) => Vec::new(),
        }
    }

    /// Mark the session terminated without talking to the debugger
    pub fn abandon(&mut self) -> Vec<HostEvent> {
        self.quit_events(None)
    }

    fn quit_events(&mut self, code: Option<i32>) -> Vec<HostEvent> {
        if self.quit {
            return Vec::new();
        }
        self.quit = true;
        self.state = SessionState::Terminated;
        let mut events = Vec::new();
        if let Some(exit_code) = code {
            events.push(HostEvent::Exited { exit_code });
        }
        events.push(HostEvent::Terminated);
        events
    }

    // === Run mode ===

    /// Apply the launch run mode once the host has sent its breakpoints
    pub async fn configuration_done(&mut self) -> Result<Vec<HostEvent>> {
        let mut run_to_start = false;
        let entry = match self.behaviour.run_mode {
            RunMode::Continue | RunMode::None => self.behaviour.stop_at_entry.function(),
            RunMode::Run => match &self.behaviour.stop_at_entry {
                StopAtEntry::Flag(true) if self.backend.supports(RUN_START_FEATURE) => {
                    run_to_start = true;
                    None
                }
                other => other.function(),
            },
        };
        if let Some(entry) = entry {
            self.backend.set_entry_breakpoint(entry).await?;
        }

        let mut events = Vec::new();
        match self.behaviour.run_mode {
            RunMode::Continue => {
                self.backend.continue_execution(None, false).await?;
                // Debuggers report "stopped" on attach even when about to run
                events.push(HostEvent::Continued {
                    thread_id: None,
                    all_threads_continued: true,
                });
            }
            RunMode::Run => {
                self.backend.start(run_to_start).await?;
            }
            RunMode::None => {
                self.state = SessionState::Stopped;
                events.push(HostEvent::Stopped(StoppedEvent {
                    reason: "pause".to_string(),
                    thread_id: self.threads.keys().next().copied().unwrap_or(1),
                    all_threads_stopped: true,
                    preserve_focus_hint: false,
                    description: Some("paused on attach".to_string()),
                    hit_breakpoint_ids: Vec::new(),
                }));
            }
        }
        Ok(events)
    }

    // === Breakpoints ===

    /// Bring the breakpoints of `file` in line with the host's list
    #[tracing::instrument(skip(self, requested), fields(count = requested.len()))]
    pub async fn set_breakpoints(
        &mut self,
        file: &str,
        requested: &[SourceBreakpoint],
        session_ids: &[u32],
        source_modified: bool,
    ) -> Result<Reconciled> {
        if source_modified {
            self.backend.clear_breakpoints(file).await?;
        }

        let wanted: BTreeSet<u32> = requested.iter().map(|bp| bp.line).collect();
        let coordinator = self.backend.breakpoints();
        for line in coordinator.lines_in(file) {
            if !wanted.contains(&line) {
                self.backend
                    .remove_breakpoint(&BreakpointId::new(file, line))
                    .await?;
            }
        }

        let sessions = if session_ids.is_empty() {
            self.known_sessions().await
        } else {
            session_ids.to_vec()
        };
        let sessions = self.backend.dialect().placement(&sessions);

        for bp in requested {
            let spec = bp.to_spec(file);
            for existing in coordinator.sessions_at(&spec.id()) {
                if !sessions.contains(&existing.session_id) || !spec.same_options(&existing) {
                    self.backend
                        .remove_single_breakpoint(&spec.id(), existing.session_id)
                        .await?;
                }
            }
        }

        let specs: Vec<_> = requested.iter().map(|bp| bp.to_spec(file)).collect();
        let backend = &self.backend;
        let added = join_all(specs.iter().map(|spec| backend.add_breakpoint(spec, &sessions))).await;

        Ok(Reconciled {
            file: added.iter().map(HostBreakpoint::from).collect(),
            all: self.list_breakpoints(),
        })
    }

    /// Replace the function breakpoints; an empty `session_ids` means every
    /// known session
    pub async fn set_function_breakpoints(
        &mut self,
        requested: &[FunctionBreakpointSpec],
        session_ids: &[u32],
    ) -> Result<Vec<FunctionBreakpoint>> {
        let sessions = if session_ids.is_empty() {
            self.known_sessions().await
        } else {
            session_ids.to_vec()
        };
        self.backend.set_function_breakpoints(requested, &sessions).await
    }

    pub fn list_breakpoints(&self) -> Vec<HostBreakpoint> {
        self.backend
            .breakpoints()
            .list()
            .iter()
            .map(HostBreakpoint::from)
            .collect()
    }

    pub async fn clear_breakpoints(&mut self, prefix: &str) -> Result<usize> {
        self.backend.clear_breakpoints(prefix).await
    }

    /// Sessions seen in thread notices, else whatever the registry lists
    async fn known_sessions(&self) -> Vec<u32> {
        let from_threads: BTreeSet<u32> = self
            .threads
            .values()
            .filter_map(|t| t.session_id)
            .collect();
        if !from_threads.is_empty() {
            return from_threads.into_iter().collect();
        }
        match &self.registry {
            Some(registry) => match registry.sessions().await {
                Ok(sessions) => sessions.into_iter().map(|s| s.sid).collect(),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not list sessions");
                    Vec::new()
                }
            },
            None => Vec::new(),
        }
    }

    // === Execution ===

    pub async fn continue_execution(&mut self, session: Option<u32>, reverse: bool) -> Result<bool> {
        self.backend.continue_execution(session, reverse).await
    }

    pub async fn next(&mut self, thread_id: i64, reverse: bool) -> Result<bool> {
        self.backend.next(thread_id, reverse).await
    }

    pub async fn step_in(&mut self, thread_id: i64, reverse: bool) -> Result<bool> {
        self.backend.step(thread_id, reverse).await
    }

    pub async fn step_out(&mut self, thread_id: i64, reverse: bool) -> Result<bool> {
        self.backend.step_out(thread_id, reverse).await
    }

    pub async fn pause(&mut self, session: Option<u32>) -> Result<bool> {
        self.backend.interrupt(session).await
    }

    pub fn goto_targets(&mut self, file: &str, line: u32) -> Vec<GotoTarget> {
        let id = self.goto_targets.len() as i64 + 1;
        self.goto_targets.insert(id, (file.to_string(), line));
        let label = file.rsplit('/').next().unwrap_or(file).to_string();
        vec![GotoTarget { id, label, line }]
    }

    pub async fn goto(&mut self, thread_id: i64, target_id: i64) -> Result<bool> {
        let (file, line) = self
            .goto_targets
            .get(&target_id)
            .cloned()
            .ok_or(Error::InvalidReference(target_id))?;
        let thread = self
            .threads
            .get(&thread_id)
            .ok_or(Error::ThreadNotFound(thread_id))?;
        let session = thread.session_id.unwrap_or(0);
        self.backend.goto(&file, line, session).await
    }

    // === Inspection ===

    /// Threads grouped by thread group, each group behind a header entry
    /// with a negative id
    pub fn threads(&self) -> Vec<Thread> {
        let mut groups: BTreeMap<Option<&str>, Vec<(i64, &ThreadRecord)>> = BTreeMap::new();
        for (id, record) in &self.threads {
            groups
                .entry(record.group_id.as_deref())
                .or_default()
                .push((*id, record));
        }

        let mut threads = Vec::with_capacity(self.threads.len() + groups.len());
        for (index, (group, members)) in groups.into_iter().enumerate() {
            threads.push(Thread {
                id: -(index as i64 + 1),
                name: format!("Group {}", group.unwrap_or("-")),
            });
            threads.extend(members.into_iter().map(|(id, record)| Thread {
                id,
                name: record.name.clone(),
            }));
        }
        threads
    }

    /// Frames `start..start+levels` of a thread; `levels` of `None` or 0
    /// means all. Also returns the full frame count.
    pub async fn stack_trace(
        &mut self,
        thread_id: i64,
        start: usize,
        levels: Option<usize>,
    ) -> Result<(Vec<StackFrame>, usize)> {
        let frames = self.backend.stack(thread_id).await?;
        let total = frames.len();
        let default_session = self
            .threads
            .get(&thread_id)
            .and_then(|t| t.session_id)
            .unwrap_or(0);

        let take = match levels {
            Some(n) if n > 0 => n,
            _ => usize::MAX,
        };
        let mut out = Vec::new();
        for frame in frames.into_iter().skip(start).take(take) {
            let thread = frame.thread_id.unwrap_or(thread_id);
            let session = frame.session_id.unwrap_or(default_session);
            let thread_u32 = u32::try_from(thread).map_err(|_| Error::InvalidReference(thread))?;
            let id = handle::encode(thread_u32, frame.level, session)?;
            out.push(StackFrame {
                id: i64::from(id),
                name: format!(
                    "{}@{}",
                    frame.function.as_deref().unwrap_or("??"),
                    frame.address.as_deref().unwrap_or("")
                ),
                source: frame.source_path().map(str::to_string),
                line: frame.line.unwrap_or(0),
                session_id: session,
                thread_id: thread,
            });
        }
        Ok((out, total))
    }

    pub fn scopes(&mut self, frame_id: i64) -> Result<Vec<Scope>> {
        let frame = handle::decode_host(frame_id)?;
        Ok([ScopeKind::Locals, ScopeKind::Registers]
            .into_iter()
            .map(|kind| Scope {
                name: kind.name().to_string(),
                variables_reference: self.handles.scope(kind, frame),
                expensive: false,
            })
            .collect())
    }

    pub async fn variables(&mut self, reference: i64) -> Result<Vec<Variable>> {
        let entry = self
            .handles
            .get(reference)
            .cloned()
            .ok_or(Error::InvalidReference(reference))?;

        match entry {
            VarRef::Scope {
                kind: ScopeKind::Registers,
                frame,
            } => {
                let registers = self
                    .backend
                    .registers(i64::from(frame.thread_id), frame.level)
                    .await?;
                Ok(registers
                    .into_iter()
                    .map(|r| Variable {
                        name: r.name,
                        value: r.value,
                        type_name: None,
                        variables_reference: 0,
                        evaluate_name: None,
                    })
                    .collect())
            }
            VarRef::Scope {
                kind: ScopeKind::Locals,
                frame,
            } => self.locals(reference, frame).await,
            VarRef::Expression {
                expression,
                value,
                frame,
            } => Ok(self.expanded(&expression, &value, frame)),
            VarRef::Object(parent) => {
                let children = self.backend.var_list_children(&parent).await?;
                Ok(children
                    .into_iter()
                    .map(|child| Variable::from(&self.handles.object(child)))
                    .collect())
            }
        }
    }

    async fn locals(&mut self, reference: i64, frame: FrameRef) -> Result<Vec<Variable>> {
        let thread = i64::from(frame.thread_id);
        let locals = self.backend.stack_variables(thread, frame.level).await?;

        if self.behaviour.var_objects {
            let requests: Vec<(String, String, bool)> = locals
                .into_iter()
                .map(|local| {
                    let name = variables::object_name(reference, &local.name);
                    let known = self.handles.object_by_name(&name).is_some();
                    (name, local.name, known)
                })
                .collect();
            let backend = &self.backend;
            let fetched = join_all(
                requests
                    .iter()
                    .map(|(name, expression, known)| fetch_object(backend, *known, name, expression, frame)),
            )
            .await;

            let mut variables = Vec::with_capacity(requests.len());
            for ((name, local, _), result) in requests.into_iter().zip(fetched) {
                match result.and_then(|refresh| self.apply_refresh(&name, refresh)) {
                    Ok(var) => variables.push(Variable::from(&var)),
                    Err(e) => variables.push(Variable {
                        name: local,
                        value: format!("<{e}>"),
                        type_name: None,
                        variables_reference: 0,
                        evaluate_name: None,
                    }),
                }
            }
            return Ok(variables);
        }

        let mut variables = Vec::with_capacity(locals.len());
        for local in locals {
            let value = local.value.unwrap_or_else(|| "<unknown>".to_string());
            let variables_reference = if expand::is_compound(&value) {
                self.handles.expression(&local.name, &value, frame)
            } else {
                0
            };
            variables.push(Variable {
                evaluate_name: Some(local.name.clone()),
                name: local.name,
                value,
                type_name: local.type_name,
                variables_reference,
            });
        }
        Ok(variables)
    }

    fn expanded(&mut self, expression: &str, value: &str, frame: FrameRef) -> Vec<Variable> {
        expand::expand(expression, value)
            .into_iter()
            .map(|child| {
                let variables_reference = if child.compound {
                    self.handles.expression(&child.expression, &child.value, frame)
                } else {
                    0
                };
                Variable {
                    name: child.name,
                    value: child.value,
                    type_name: None,
                    variables_reference,
                    evaluate_name: Some(child.expression),
                }
            })
            .collect()
    }

    /// Refresh a tracked variable object, creating it when the debugger does
    /// not know it
    async fn update_or_create(
        &mut self,
        name: &str,
        expression: &str,
        frame: FrameRef,
    ) -> Result<VariableObject> {
        let known = self.handles.object_by_name(name).is_some();
        let refresh = fetch_object(&self.backend, known, name, expression, frame).await?;
        self.apply_refresh(name, refresh)
    }

    fn apply_refresh(&mut self, name: &str, refresh: Refresh) -> Result<VariableObject> {
        match refresh {
            Refresh::Updated(changes) => {
                for change in &changes {
                    if let Some(changed) = change.str_at("name") {
                        if let Some(var) = self.handles.object_by_name_mut(changed) {
                            var.apply_changes(change);
                        }
                    }
                }
                self.handles
                    .object_by_name(name)
                    .cloned()
                    .ok_or_else(|| Error::Internal(format!("Variable object {name} is not tracked")))
            }
            Refresh::Created(var) => Ok(self.handles.object(var)),
        }
    }

    pub async fn evaluate(
        &mut self,
        expression: &str,
        frame_id: Option<i64>,
        context: EvaluateContext,
    ) -> Result<EvaluateResult> {
        let frame = frame_id.map(handle::decode_host).transpose()?;
        let (thread, level) = frame
            .map(|f| (i64::from(f.thread_id), f.level))
            .unwrap_or((0, 0));

        match context {
            EvaluateContext::Repl => {
                let record = self.backend.send_user_input(expression, thread, level).await?;
                Ok(EvaluateResult {
                    result: record.result_str("value").unwrap_or_default().to_string(),
                    type_name: None,
                    variables_reference: 0,
                })
            }
            EvaluateContext::Watch | EvaluateContext::Hover if self.behaviour.var_objects => {
                let frame = frame.unwrap_or(FrameRef::new(0, 0, 0));
                let name = variables::object_name(frame_id.unwrap_or(0), expression);
                match self.update_or_create(&name, expression, frame).await {
                    Ok(var) => Ok(EvaluateResult {
                        result: var.display_value().to_string(),
                        type_name: (!var.type_name.is_empty()).then(|| var.type_name.clone()),
                        variables_reference: if var.is_compound() { var.handle } else { 0 },
                    }),
                    // Watch errors are shown in place of the value
                    Err(e) => Ok(EvaluateResult {
                        result: e.to_string(),
                        type_name: None,
                        variables_reference: 0,
                    }),
                }
            }
            EvaluateContext::Watch | EvaluateContext::Hover => {
                let value = self.backend.evaluate(expression, thread, level).await?;
                let variables_reference = match frame {
                    Some(frame) if expand::is_compound(&value) => {
                        self.handles.expression(expression, &value, frame)
                    }
                    _ => 0,
                };
                Ok(EvaluateResult {
                    result: value,
                    type_name: None,
                    variables_reference,
                })
            }
        }
    }

    /// Assign `value` to the child `name` of `reference`; returns the new
    /// value as the debugger prints it
    pub async fn set_variable(&mut self, reference: i64, name: &str, value: &str) -> Result<String> {
        let entry = self
            .handles
            .get(reference)
            .cloned()
            .ok_or(Error::InvalidReference(reference))?;

        if self.behaviour.var_objects {
            let object = match &entry {
                VarRef::Object(parent) => Some(format!("{}.{}", parent.name, name)),
                VarRef::Scope {
                    kind: ScopeKind::Locals,
                    ..
                } => Some(variables::object_name(reference, name)),
                _ => None,
            };
            if let Some(object) = object {
                let new_value = self.backend.var_assign(&object, value).await?;
                if let Some(var) = self.handles.object_by_name_mut(&object) {
                    var.value = Some(new_value.clone());
                }
                return Ok(new_value);
            }
        }

        let target = match &entry {
            VarRef::Expression {
                expression, value, ..
            } => expand::expand(expression, value)
                .into_iter()
                .find(|child| child.name == name)
                .map(|child| child.expression)
                .unwrap_or_else(|| format!("{expression}.{name}")),
            _ => name.to_string(),
        };
        self.backend.set_variable(&target, value).await?;
        Ok(value.to_string())
    }

    pub async fn read_memory(&mut self, address: u64, count: usize) -> Result<String> {
        self.backend.examine_memory(address, count).await
    }

    // === Lifecycle ===

    /// End the session: detach and leave the debuggee running, or stop the
    /// debugger
    pub async fn disconnect(&mut self, terminate: bool) -> Result<Vec<HostEvent>> {
        let code = if terminate {
            self.backend.stop().await?
        } else {
            self.backend.detach().await?;
            None
        };
        Ok(self.quit_events(code))
    }
}
