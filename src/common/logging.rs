//! Logging and tracing configuration
//!
//! stdout carries the host protocol, so console logs always go to stderr.
//! An optional file log gets full detail through a non-blocking writer.

use std::path::{Path, PathBuf};

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    Layer,
    util::SubscriberInitExt,
    EnvFilter,
};

use super::paths;

const DEFAULT_FILTER: &str = "mibridge=info,warn";
const LOG_FILE: &str = "mi-bridge.log";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Stderr-only logging for one-shot commands
///
/// Controlled by `RUST_LOG`; default is INFO for this crate, WARN for
/// dependencies.
pub fn init_cli() {
    tracing_subscriber::registry()
        .with(filter())
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Logging for the bridge server: stderr plus a file log
///
/// `log_file` overrides the default location under [`paths::log_dir`].
/// The returned guard flushes the file writer when dropped and must live as
/// long as the server. Falls back to stderr only when no log file can be
/// opened.
pub fn init_server(log_file: Option<&Path>) -> (Option<WorkerGuard>, Option<PathBuf>) {
    let path = log_file
        .map(Path::to_path_buf)
        .or_else(|| paths::log_dir().map(|dir| dir.join(LOG_FILE)));

    if let Some(path) = &path {
        match open_log(path) {
            Ok(file) => {
                let (writer, guard) = tracing_appender::non_blocking(file);
                let file_layer = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE);

                tracing_subscriber::registry()
                    .with(filter())
                    .with(file_layer)
                    .with(stderr_layer())
                    .init();
                return (Some(guard), Some(path.clone()));
            }
            Err(e) => eprintln!("Warning: Could not open log file {}: {e}", path.display()),
        }
    }

    tracing_subscriber::registry()
        .with(filter())
        .with(stderr_layer())
        .init();
    (None, None)
}

fn stderr_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .compact()
}

fn open_log(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_log_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs").join(LOG_FILE);
        open_log(&path).unwrap();
        assert!(path.exists());
    }
}
