//! Session-aware MI backend
//!
//! Owns the debugger process. Commands are written one full line at a time
//! under a lock and correlated to their replies by token; a background task
//! reads stdout line by line, resolving pending commands and turning
//! out-of-band records into [`BackendEvent`]s.

pub mod breakpoints;
pub mod dialect;
pub mod dispatch;
pub mod events;
pub mod logpoint;
mod queries;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::common::{Error, Result};
use crate::mi::{codec, escape, Record, ResultClass};
use crate::registry::{self, SessionRegistry};

pub use breakpoints::{
    Breakpoint, BreakpointCoordinator, BreakpointId, BreakpointSpec, CommandSink,
    FunctionBreakpoint, FunctionBreakpointSpec, HitCondition, SessionId, SingleBreakpoint,
};
pub use dialect::{Dialect, Step};
pub use events::{BackendEvent, OutputCategory, RunningNotice, StopEvent, StoppedThreads, ThreadNotice};
pub use queries::{LocalVariable, RegisterValue, StackFrame, ThreadEntry};

use dispatch::{Dispatcher, PendingTable};
use logpoint::LogPointTracker;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type SharedWriter = Arc<tokio::sync::Mutex<BoxedWriter>>;

/// Readiness poll settings
#[derive(Clone)]
pub struct Readiness {
    pub registry: Arc<dyn SessionRegistry>,
    pub interval: Duration,
    pub max_attempts: u32,
}

/// Everything needed to start a backend
#[derive(Clone)]
pub struct LaunchOptions {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub dialect: Dialect,
    /// Commands issued once the backend is ready
    pub init_commands: Vec<String>,
    /// Period of the keepalive newline, if any
    pub keepalive: Option<Duration>,
    pub detach_timeout: Duration,
    pub readiness: Option<Readiness>,
}

impl LaunchOptions {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dialect: Dialect::default(),
            init_commands: Vec::new(),
            keepalive: None,
            detach_timeout: Duration::from_secs(1),
            readiness: None,
        }
    }
}

/// Connection to one debugger process
pub struct Backend {
    writer: SharedWriter,
    next_token: AtomicU64,
    pending: PendingTable,
    events_tx: mpsc::UnboundedSender<BackendEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<BackendEvent>>,
    breakpoints: BreakpointCoordinator,
    dialect: Dialect,
    process: tokio::sync::Mutex<Option<Child>>,
    closed: Arc<AtomicBool>,
    ready: AtomicBool,
    features: Mutex<Vec<String>>,
    detach_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl Backend {
    /// Spawn the debugger, wait for the session service, run init commands
    #[tracing::instrument(skip(options), fields(program = %options.program.display()))]
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let mut backend = Self::spawn(options)?;

        if let Some(readiness) = &options.readiness {
            if let Err(e) = registry::wait_until_ready(
                readiness.registry.as_ref(),
                readiness.interval,
                readiness.max_attempts,
            )
            .await
            {
                backend.kill().await;
                return Err(e);
            }
        }

        backend.ready.store(true, Ordering::SeqCst);
        let _ = backend.events_tx.send(BackendEvent::Ready);
        tracing::info!("Backend ready");

        for command in &options.init_commands {
            backend.send_user_input(command, 0, 0).await?;
        }
        if let Some(keepalive) = options.keepalive {
            backend.start_keepalive(keepalive);
        }
        Ok(backend)
    }

    /// Start the debugger process and its reader task
    pub fn spawn(options: &LaunchOptions) -> Result<Self> {
        tracing::debug!(args = ?options.args, "Spawning debugger");
        let mut child = Command::new(&options.program)
            .args(&options.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::ProcessSpawn(format!("Failed to start {}: {}", options.program.display(), e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::ProcessSpawn("Failed to get debugger stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ProcessSpawn("Failed to get debugger stdout".to_string()))?;
        let stderr = child.stderr.take();

        let mut backend = Self::from_io(stdout, stdin, options.dialect);
        backend.detach_timeout = options.detach_timeout;
        backend.process = tokio::sync::Mutex::new(Some(child));
        if let Some(stderr) = stderr {
            let events = backend.events_tx.clone();
            backend.tasks.push(tokio::spawn(forward_stderr(stderr, events)));
        }
        Ok(backend)
    }

    /// Run over arbitrary streams, with no process attached
    pub fn from_io<R, W>(reader: R, writer: W, dialect: Dialect) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending = PendingTable::default();
        let logpoints = Arc::new(Mutex::new(LogPointTracker::default()));
        let closed = Arc::new(AtomicBool::new(false));

        let dispatcher = Dispatcher::new(pending.clone(), events_tx.clone(), logpoints.clone());
        let reader_task = tokio::spawn(read_loop(
            reader,
            dispatcher,
            pending.clone(),
            closed.clone(),
            events_tx.clone(),
        ));

        Self {
            writer: Arc::new(tokio::sync::Mutex::new(Box::new(writer))),
            next_token: AtomicU64::new(1),
            pending,
            breakpoints: BreakpointCoordinator::new(logpoints, events_tx.clone()),
            events_tx,
            events_rx: Some(events_rx),
            dialect,
            process: tokio::sync::Mutex::new(None),
            closed,
            ready: AtomicBool::new(false),
            features: Mutex::new(Vec::new()),
            detach_timeout: Duration::from_secs(1),
            tasks: vec![reader_task],
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<BackendEvent>> {
        self.events_rx.take()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn breakpoints(&self) -> &BreakpointCoordinator {
        &self.breakpoints
    }

    /// Commands whose reply has not arrived yet
    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    fn emit(&self, event: BackendEvent) {
        let _ = self.events_tx.send(event);
    }

    fn start_keepalive(&mut self, period: Duration) {
        let writer = self.writer.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut writer = writer.lock().await;
                if codec::write_raw(&mut *writer, "").await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Send one command and wait for its result record
    ///
    /// An `error` result either fails with [`Error::Command`] or, when
    /// `suppress_failure` is set, is logged and returned for the caller to
    /// inspect.
    pub async fn send_command(&self, command: &str, suppress_failure: bool) -> Result<Record> {
        if self.is_closed() {
            return Err(Error::ProcessExited { code: None });
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut writer = self.writer.lock().await;
            let token = self.next_token.fetch_add(1, Ordering::SeqCst);
            self.pending.insert(token, tx);
            tracing::debug!(token, command, "MI >>>");
            if let Err(e) = codec::write_command(&mut *writer, token, command).await {
                self.pending.remove(token);
                return Err(e);
            }
        }

        let record = rx.await.map_err(|_| Error::ProcessExited { code: None })?;
        if record.is_class(ResultClass::Error) {
            let msg = record.result_str("msg").unwrap_or("Internal error");
            if suppress_failure {
                tracing::warn!(command, msg, "Error executing command");
                self.emit(BackendEvent::output(
                    OutputCategory::Stderr,
                    format!("WARNING: Error executing command '{command}'\n"),
                ));
                return Ok(record);
            }
            return Err(Error::command_failed(command, msg));
        }
        Ok(record)
    }

    /// Write a line without a token; no reply is awaited
    pub async fn send_raw(&self, text: &str) -> Result<()> {
        tracing::debug!(text, "MI >>> (raw)");
        let mut writer = self.writer.lock().await;
        codec::write_raw(&mut *writer, text).await
    }

    async fn expect_class(&self, command: &str, class: ResultClass) -> Result<bool> {
        let record = self.send_command(command, false).await?;
        Ok(record.is_class(class))
    }

    // === Execution control ===

    /// Continue all sessions, or just `session`
    pub async fn continue_execution(&self, session: Option<SessionId>, reverse: bool) -> Result<bool> {
        let command = self.dialect.continue_command(session, reverse);
        self.expect_class(&command, ResultClass::Running).await
    }

    pub async fn next(&self, thread_id: i64, reverse: bool) -> Result<bool> {
        self.step_with(Step::Next, thread_id, reverse).await
    }

    pub async fn step(&self, thread_id: i64, reverse: bool) -> Result<bool> {
        self.step_with(Step::Step, thread_id, reverse).await
    }

    pub async fn step_out(&self, thread_id: i64, reverse: bool) -> Result<bool> {
        self.step_with(Step::Finish, thread_id, reverse).await
    }

    async fn step_with(&self, step: Step, thread_id: i64, reverse: bool) -> Result<bool> {
        let command = self.dialect.step_command(step, thread_id, reverse);
        self.expect_class(&command, ResultClass::Running).await
    }

    pub async fn interrupt(&self, session: Option<SessionId>) -> Result<bool> {
        let command = self.dialect.interrupt_command(session);
        self.expect_class(&command, ResultClass::Done).await
    }

    pub async fn switch_thread(&self, thread_id: i64) -> Result<bool> {
        self.expect_class(&format!("thread-select {thread_id}"), ResultClass::Done)
            .await
    }

    /// Move execution of `session` to `file:line`
    ///
    /// A temporary breakpoint at the target keeps the session from running
    /// past it.
    pub async fn goto(&self, file: &str, line: u32, session: SessionId) -> Result<bool> {
        let location = format!("\"{}:{}\"", escape(file), line);
        let switch = self.dialect.session_switch(session);
        self.send_command(&format!("break-insert -t -f {location}{switch}"), false)
            .await?;
        let record = self
            .send_command(&format!("exec-jump {location}{switch}"), false)
            .await?;
        Ok(matches!(
            record.result_class,
            Some(ResultClass::Done | ResultClass::Running)
        ))
    }

    /// `exec-run`, optionally stopping at the program's entry
    pub async fn start(&self, run_to_start: bool) -> Result<bool> {
        let command = if run_to_start { "exec-run --start" } else { "exec-run" };
        self.expect_class(command, ResultClass::Running).await
    }

    pub async fn set_entry_breakpoint(&self, entry: &str) -> Result<bool> {
        self.expect_class(&format!("break-insert -t -f {entry}"), ResultClass::Done)
            .await
    }

    // === Breakpoints ===

    pub async fn add_breakpoint(&self, spec: &BreakpointSpec, sessions: &[SessionId]) -> Breakpoint {
        self.breakpoints.add_breakpoint(self, spec, sessions).await
    }

    pub async fn add_single_breakpoint(
        &self,
        spec: &BreakpointSpec,
        session: SessionId,
    ) -> Result<SingleBreakpoint> {
        self.breakpoints.add_single_breakpoint(self, spec, session).await
    }

    pub async fn remove_breakpoint(&self, id: &BreakpointId) -> Result<()> {
        self.breakpoints.remove_breakpoint(self, id).await
    }

    pub async fn remove_single_breakpoint(&self, id: &BreakpointId, session: SessionId) -> Result<bool> {
        self.breakpoints.remove_single_breakpoint(self, id, session).await
    }

    pub async fn clear_breakpoints(&self, prefix: &str) -> Result<usize> {
        self.breakpoints.clear_breakpoints(self, prefix).await
    }

    pub async fn set_function_breakpoints(
        &self,
        specs: &[FunctionBreakpointSpec],
        sessions: &[SessionId],
    ) -> Result<Vec<FunctionBreakpoint>> {
        self.breakpoints
            .set_function_breakpoints(self, specs, sessions)
            .await
    }

    // === Lifecycle ===

    /// Interrupt the debugger process and wait for it to exit
    pub async fn stop(&self) -> Result<Option<i32>> {
        let mut process = self.process.lock().await;
        let Some(child) = process.as_mut() else {
            return Ok(None);
        };
        interrupt_process(child)?;
        let status = child.wait().await?;
        tracing::info!(code = ?status.code(), "Debugger exited");
        *process = None;
        Ok(status.code())
    }

    /// Detach from the debuggee; kill the debugger if it lingers
    pub async fn detach(&self) -> Result<()> {
        self.send_raw("-target-detach").await?;
        let mut process = self.process.lock().await;
        if let Some(child) = process.as_mut() {
            match tokio::time::timeout(self.detach_timeout, child.wait()).await {
                Ok(status) => {
                    tracing::info!(code = ?status?.code(), "Debugger exited after detach");
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.detach_timeout.as_millis() as u64,
                        "Debugger did not exit after detach, killing"
                    );
                    child.kill().await?;
                }
            }
        }
        *process = None;
        Ok(())
    }

    async fn kill(&self) {
        if let Some(mut child) = self.process.lock().await.take() {
            let _ = child.kill().await;
        }
    }
}

#[async_trait]
impl CommandSink for Backend {
    async fn send_command(&self, command: &str, suppress_failure: bool) -> Result<Record> {
        Backend::send_command(self, command, suppress_failure).await
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        // Best-effort since we can't await in drop
        if let Some(child) = self.process.get_mut().as_mut() {
            let _ = child.start_kill();
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    reader: R,
    dispatcher: Dispatcher,
    pending: PendingTable,
    closed: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<BackendEvent>,
) {
    let mut reader = BufReader::new(reader);
    loop {
        match codec::read_line(&mut reader).await {
            Ok(Some(line)) => dispatcher.dispatch_line(&line),
            Ok(None) => {
                tracing::info!("Debugger output closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed reading debugger output");
                break;
            }
        }
    }
    closed.store(true, Ordering::SeqCst);
    pending.fail_all();
    let _ = events.send(BackendEvent::Quit { code: None });
}

async fn forward_stderr<R: AsyncRead + Unpin>(stderr: R, events: mpsc::UnboundedSender<BackendEvent>) {
    let mut reader = BufReader::new(stderr);
    while let Ok(Some(line)) = codec::read_line(&mut reader).await {
        tracing::debug!(line, "debugger stderr");
        if events
            .send(BackendEvent::output(OutputCategory::Stderr, format!("{line}\n")))
            .is_err()
        {
            break;
        }
    }
}

#[cfg(unix)]
fn interrupt_process(child: &mut Child) -> Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if rc != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn interrupt_process(child: &mut Child) -> Result<()> {
    child.start_kill()?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, DuplexStream};

    /// A backend wired to an in-memory peer playing the debugger
    fn scripted() -> (Backend, BufReader<DuplexStream>, DuplexStream) {
        let (to_backend, backend_stdout) = duplex(64 * 1024);
        let (backend_stdin, from_backend) = duplex(64 * 1024);
        let backend = Backend::from_io(backend_stdout, backend_stdin, Dialect::Ddb);
        (backend, BufReader::new(from_backend), to_backend)
    }

    async fn next_line(reader: &mut BufReader<DuplexStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    #[tokio::test]
    async fn test_tokens_start_at_one_and_increase() {
        let (backend, mut peer_in, mut peer_out) = scripted();
        let backend = Arc::new(backend);

        let b = backend.clone();
        let first = tokio::spawn(async move { b.send_command("thread-info", false).await });
        assert_eq!(next_line(&mut peer_in).await, "1-thread-info");
        let b = backend.clone();
        let second = tokio::spawn(async move { b.send_command("list-features", false).await });
        assert_eq!(next_line(&mut peer_in).await, "2-list-features");

        peer_out.write_all(b"2^done,features=[\"exec-run-start-option\"]\n1^done,threads=[]\n").await.unwrap();
        let second = second.await.unwrap().unwrap();
        let first = first.await.unwrap().unwrap();
        assert_eq!(second.result_str("features[0]"), Some("exec-run-start-option"));
        assert_eq!(first.token, Some(1));
        assert_eq!(backend.pending_commands(), 0);
    }

    #[tokio::test]
    async fn test_error_result_policies() {
        let (backend, mut peer_in, mut peer_out) = scripted();
        let backend = Arc::new(backend);

        let b = backend.clone();
        let strict = tokio::spawn(async move { b.send_command("exec-next --thread 9", false).await });
        next_line(&mut peer_in).await;
        peer_out.write_all(b"1^error,msg=\"Invalid thread id: 9\"\n").await.unwrap();
        match strict.await.unwrap() {
            Err(Error::Command { command, message }) => {
                assert_eq!(command, "exec-next --thread 9");
                assert_eq!(message, "Invalid thread id: 9");
            }
            other => panic!("expected command error, got {other:?}"),
        }

        let b = backend.clone();
        let lenient = tokio::spawn(async move { b.send_command("break-delete 3", true).await });
        next_line(&mut peer_in).await;
        peer_out.write_all(b"2^error,msg=\"No breakpoint number 3.\"\n").await.unwrap();
        let record = lenient.await.unwrap().unwrap();
        assert!(record.is_class(ResultClass::Error));
    }

    #[tokio::test]
    async fn test_control_ops_map_result_class() {
        let (mut backend, mut peer_in, mut peer_out) = scripted();
        let mut events = backend.take_event_receiver().unwrap();
        let backend = Arc::new(backend);

        let b = backend.clone();
        let cont = tokio::spawn(async move { b.continue_execution(Some(2), false).await });
        assert_eq!(next_line(&mut peer_in).await, "1-record-time-and-continue --session 2");
        peer_out.write_all(b"1^running\n*running,thread-id=\"all\",session-id=\"2\"\n").await.unwrap();
        assert!(cont.await.unwrap().unwrap());
        match events.recv().await {
            Some(BackendEvent::Running(notice)) => assert_eq!(notice.session_id, Some(2)),
            other => panic!("expected running, got {other:?}"),
        }

        let b = backend.clone();
        let pause = tokio::spawn(async move { b.interrupt(None).await });
        assert_eq!(next_line(&mut peer_in).await, "2-exec-interrupt");
        peer_out.write_all(b"2^done\n").await.unwrap();
        assert!(pause.await.unwrap().unwrap());

        let b = backend.clone();
        let step = tokio::spawn(async move { b.step(4, true).await });
        assert_eq!(next_line(&mut peer_in).await, "3-record-time-and-step --thread 4 --reverse");
        peer_out.write_all(b"3^done\n").await.unwrap();
        assert!(!step.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_eof_fails_waiters_and_emits_quit() {
        let (mut backend, mut peer_in, peer_out) = scripted();
        let mut events = backend.take_event_receiver().unwrap();
        let backend = Arc::new(backend);

        let b = backend.clone();
        let waiter = tokio::spawn(async move { b.send_command("exec-run", false).await });
        next_line(&mut peer_in).await;
        drop(peer_out);

        assert!(matches!(waiter.await.unwrap(), Err(Error::ProcessExited { .. })));
        assert!(matches!(events.recv().await, Some(BackendEvent::Quit { .. })));
        assert!(backend.is_closed());
        assert!(matches!(
            backend.send_command("exec-run", false).await,
            Err(Error::ProcessExited { .. })
        ));
    }
}
