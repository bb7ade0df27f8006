//! MI bridge - a session-aware debugger bridge over a GDB/MI-style protocol
//!
//! Drives a multi-session debugger through its machine interface and
//! exposes it to a host as JSON requests, responses and events.

pub mod backend;
pub mod bridge;
pub mod cli;
pub mod commands;
pub mod common;
pub mod mi;
pub mod registry;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use mi::{parse_line, Record, Value};
