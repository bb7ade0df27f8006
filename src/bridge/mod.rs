//! Host bridge
//!
//! Reads host requests from stdin, drives one debug session and writes
//! responses and events to stdout.

pub mod handler;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stops;
pub mod variables;

use crate::common::{config::Config, Result};

pub use session::{Behaviour, DebugSession, SessionOptions, SessionState};

/// Serve host requests on stdio until input ends or a signal arrives
pub async fn run(config: Config) -> Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        debugger = %config.debugger.path.display(),
        "Starting MI bridge"
    );

    let mut server = server::Server::new(config);
    server.run().await
}
