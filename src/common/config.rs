//! Configuration file handling

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::Dialect;
use crate::bridge::protocol::RunMode;
use crate::registry::URL_ENV;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub debugger: DebuggerConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

/// How to start the debugger process
#[derive(Debug, Clone, Deserialize)]
pub struct DebuggerConfig {
    /// Executable name or path; bare names are looked up on PATH
    #[serde(default = "default_debugger")]
    pub path: PathBuf,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub dialect: Dialect,

    /// Issued once the backend is ready
    #[serde(default)]
    pub init_commands: Vec<String>,

    /// Keepalive newline period, 0 disables
    #[serde(default = "default_keepalive")]
    pub keepalive_ms: u64,

    #[serde(default = "default_detach_timeout")]
    pub detach_timeout_ms: u64,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            path: default_debugger(),
            args: Vec::new(),
            dialect: Dialect::default(),
            init_commands: Vec::new(),
            keepalive_ms: default_keepalive(),
            detach_timeout_ms: default_detach_timeout(),
        }
    }
}

fn default_debugger() -> PathBuf {
    PathBuf::from("ddb")
}
fn default_keepalive() -> u64 {
    2000
}
fn default_detach_timeout() -> u64 {
    1000
}

impl DebuggerConfig {
    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_ms > 0).then(|| Duration::from_millis(self.keepalive_ms))
    }

    pub fn detach_timeout(&self) -> Duration {
        Duration::from_millis(self.detach_timeout_ms)
    }

    /// Absolute path of the debugger executable
    pub fn resolve_path(&self) -> Result<PathBuf> {
        resolve_executable(&self.path)
    }
}

/// Find `path` directly or on PATH
pub fn resolve_executable(path: &Path) -> Result<PathBuf> {
    if path.components().count() > 1 || path.is_absolute() {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::debugger_not_found(
            &path.display().to_string(),
            &[path.display().to_string()],
        ));
    }
    which::which(path).map_err(|_| {
        let name = path.display().to_string();
        Error::debugger_not_found(&name, &["PATH"])
    })
}

/// Session registry settings
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_url")]
    pub url: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Poll for readiness before declaring the backend ready
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
            enabled: true,
        }
    }
}

fn default_registry_url() -> String {
    "http://localhost:5000".to_string()
}
fn default_poll_interval() -> u64 {
    1000
}
fn default_max_attempts() -> u32 {
    30
}
fn default_true() -> bool {
    true
}

impl RegistryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// `stop_at_entry = true` or `stop_at_entry = "my_main"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopAtEntry {
    Flag(bool),
    Function(String),
}

impl Default for StopAtEntry {
    fn default() -> Self {
        StopAtEntry::Flag(false)
    }
}

impl StopAtEntry {
    pub fn is_set(&self) -> bool {
        !matches!(self, StopAtEntry::Flag(false))
    }

    /// Function to break at, with `main` for a plain `true`
    pub fn function(&self) -> Option<&str> {
        match self {
            StopAtEntry::Flag(true) => Some("main"),
            StopAtEntry::Flag(false) => None,
            StopAtEntry::Function(name) => Some(name),
        }
    }
}

/// Orchestrator behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub run_mode: RunMode,

    #[serde(default)]
    pub stop_at_entry: StopAtEntry,

    /// Inspect locals through variable objects instead of printed text
    #[serde(default = "default_true")]
    pub var_objects: bool,

    /// Interrupt every session when one hits a breakpoint
    #[serde(default = "default_true")]
    pub interrupt_on_breakpoint: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            run_mode: RunMode::default(),
            stop_at_entry: StopAtEntry::default(),
            var_objects: true,
            interrupt_on_breakpoint: true,
        }
    }
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default().with_env()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content).map(Self::with_env)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Apply environment overrides
    fn with_env(mut self) -> Self {
        if let Ok(url) = std::env::var(URL_ENV) {
            if !url.is_empty() {
                self.registry.url = url;
            }
        }
        self
    }
}
