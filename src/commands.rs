//! CLI command definitions

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Serve host requests as JSON lines on stdin/stdout
    Serve {
        /// Log file (default: under the platform data directory)
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// List live sessions from the session registry
    Sessions {
        /// Registry URL (default: from config or SESSIONS_COMMANDS_API_URL)
        #[arg(long)]
        url: Option<String>,
    },

    /// Parse MI output lines and print them as JSON
    ///
    /// Reads stdin when no line is given.
    Parse {
        line: Option<String>,
    },

    /// Configuration file management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the configuration file location
    Path,

    /// Print the effective configuration
    Show,

    /// Write a default configuration file if none exists
    Init,
}
