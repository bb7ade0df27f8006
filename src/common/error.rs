//! Error types for the MI bridge
//!
//! Every failure carries enough context (command text, session, line) for the
//! host to show a useful message without consulting the bridge log.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum Error {
    // === Process Errors ===
    #[error("Debugger '{name}' not found. Searched: {searched}")]
    DebuggerNotFound { name: String, searched: String },

    #[error("Debugger failed to start: {0}")]
    ProcessSpawn(String),

    #[error("Debugger process exited{}", .code.map(|c| format!(" with code {c}")).unwrap_or_default())]
    ProcessExited { code: Option<i32> },

    // === MI Protocol Errors ===
    #[error("Command '{command}' failed: {message}")]
    Command { command: String, message: String },

    #[error("Unhandled MI output: {line}")]
    Parse { line: String },

    #[error("Unexpected reply to '{command}': {reason}")]
    UnexpectedReply { command: String, reason: String },

    // === Breakpoint Errors ===
    #[error("Breakpoint at {location} rejected by session {session_id}: {reason}")]
    BreakpointRejected {
        location: String,
        session_id: u32,
        reason: String,
    },

    #[error("Invalid breakpoint id '{0}', expected '<file>|||<line>'")]
    InvalidBreakpointId(String),

    // === Registry Errors ===
    #[error("Session service not ready after {attempts} attempts")]
    ServiceNotReady { attempts: u32 },

    #[error("Session registry error: {0}")]
    Registry(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // === Handle Errors ===
    #[error("{field} {value} does not fit in a frame handle (max {max})")]
    HandleOverflow {
        field: &'static str,
        value: u32,
        max: u32,
    },

    #[error("Unknown variable reference {0}")]
    InvalidReference(i64),

    // === Session Errors ===
    #[error("No debug session active. Send a launch request first")]
    SessionNotActive,

    #[error("Debug session already active")]
    SessionAlreadyActive,

    #[error("Cannot {action} while session is {state}")]
    InvalidState { action: String, state: String },

    #[error("Thread {0} not found")]
    ThreadNotFound(i64),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of [`Error`] used for propagation decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Command,
    Process,
    Parse,
    PartialBreakpoint,
    ServiceNotReady,
    Handle,
    Session,
    Config,
    Io,
    Internal,
}

impl Error {
    /// Create a debugger not found error with search paths
    pub fn debugger_not_found<S: AsRef<str>>(name: &str, paths: &[S]) -> Self {
        Self::DebuggerNotFound {
            name: name.to_string(),
            searched: paths.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", "),
        }
    }

    /// Create a command failure carrying the MI `msg` and the command text
    pub fn command_failed(command: &str, message: &str) -> Self {
        Self::Command {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    pub fn unexpected_reply(command: &str, reason: &str) -> Self {
        Self::UnexpectedReply {
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn breakpoint_rejected(location: &str, session_id: u32, reason: &str) -> Self {
        Self::BreakpointRejected {
            location: location.to_string(),
            session_id,
            reason: reason.to_string(),
        }
    }

    pub fn handle_overflow(field: &'static str, value: u32, max: u32) -> Self {
        Self::HandleOverflow { field, value, max }
    }

    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: &str) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Command { .. } | Error::UnexpectedReply { .. } => ErrorKind::Command,
            Error::DebuggerNotFound { .. }
            | Error::ProcessSpawn(_)
            | Error::ProcessExited { .. } => ErrorKind::Process,
            Error::Parse { .. } => ErrorKind::Parse,
            Error::BreakpointRejected { .. } | Error::InvalidBreakpointId(_) => {
                ErrorKind::PartialBreakpoint
            }
            Error::ServiceNotReady { .. } | Error::Registry(_) | Error::Http(_) => {
                ErrorKind::ServiceNotReady
            }
            Error::HandleOverflow { .. } | Error::InvalidReference(_) => ErrorKind::Handle,
            Error::SessionNotActive
            | Error::SessionAlreadyActive
            | Error::InvalidState { .. }
            | Error::ThreadNotFound(_) => ErrorKind::Session,
            Error::Config(_) | Error::ConfigParse(_) | Error::FileRead { .. } => {
                ErrorKind::Config
            }
            Error::Io(_) | Error::Json(_) => ErrorKind::Io,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error ends the debugger session
    ///
    /// Registry lookups can fail while the debugger is still usable; only a
    /// readiness timeout is fatal.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Process || matches!(self, Error::ServiceNotReady { .. })
    }
}

/// Serializable error for host responses
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HostError {
    pub code: String,
    pub message: String,
}

impl From<&Error> for HostError {
    fn from(e: &Error) -> Self {
        let code = match e {
            Error::SessionNotActive => "SESSION_NOT_ACTIVE",
            Error::SessionAlreadyActive => "SESSION_ALREADY_ACTIVE",
            Error::DebuggerNotFound { .. } => "DEBUGGER_NOT_FOUND",
            Error::ProcessSpawn(_) => "PROCESS_SPAWN_FAILED",
            Error::ProcessExited { .. } => "PROCESS_EXITED",
            Error::Command { .. } => "COMMAND_FAILED",
            Error::UnexpectedReply { .. } => "UNEXPECTED_REPLY",
            Error::BreakpointRejected { .. } => "BREAKPOINT_REJECTED",
            Error::ServiceNotReady { .. } => "SERVICE_NOT_READY",
            Error::Registry(_) | Error::Http(_) => "REGISTRY_ERROR",
            Error::Parse { .. } => "PARSE_ERROR",
            Error::HandleOverflow { .. } => "HANDLE_OVERFLOW",
            Error::InvalidReference(_) => "INVALID_REFERENCE",
            Error::InvalidState { .. } => "INVALID_STATE",
            Error::ThreadNotFound(_) => "THREAD_NOT_FOUND",
            _ => "INTERNAL_ERROR",
        }
        .to_string();

        Self {
            code,
            message: e.to_string(),
        }
    }
}
