//! MI bridge - session-aware debugger bridge
//!
//! `mi-bridge serve` speaks JSON lines to the host on stdio and the
//! machine interface to the debugger.

use std::path::PathBuf;

use clap::Parser;
use mibridge::commands::Commands;
use mibridge::common::{config::Config, logging};
use mibridge::{bridge, cli};

#[derive(Parser)]
#[command(name = "mi-bridge", about = "Session-aware debugger bridge")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The guard flushes the file log on exit
    let _guard = match &cli.command {
        Commands::Serve { log_file } => {
            let (guard, path) = logging::init_server(log_file.as_deref());
            if let Some(path) = path {
                tracing::debug!(path = %path.display(), "Logging to file");
            }
            guard
        }
        _ => {
            logging::init_cli();
            None
        }
    };

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve { .. } => bridge::run(config).await,
        command => cli::dispatch(command, config).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Exiting");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
