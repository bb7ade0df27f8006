//! One-shot CLI commands
//!
//! Everything except `serve`, which hands over to the bridge.

use std::io::BufRead;
use std::path::Path;

use crate::commands::{Commands, ConfigCommands};
use crate::common::{config::Config, paths, Error, Result};
use crate::mi::parse_record;
use crate::registry::{HttpRegistry, SessionRegistry};

/// Written by `config init`
const DEFAULT_CONFIG: &str = r#"[debugger]
path = "ddb"
dialect = "ddb"
init_commands = []
keepalive_ms = 2000
detach_timeout_ms = 1000

[registry]
url = "http://localhost:5000"
poll_interval_ms = 1000
max_attempts = 30
enabled = true

[session]
run_mode = "none"
stop_at_entry = false
var_objects = true
interrupt_on_breakpoint = true
"#;

/// Dispatch a one-shot command
pub async fn dispatch(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Serve { .. } => Err(Error::Internal(
            "serve is handled by the bridge".to_string(),
        )),

        Commands::Sessions { url } => {
            let registry = HttpRegistry::new(url.unwrap_or(config.registry.url))?;
            let sessions = registry.sessions().await?;
            if sessions.is_empty() {
                println!("No live sessions");
            }
            for session in sessions {
                println!(
                    "{:>4}  {:<20} {:<10} {}",
                    session.sid, session.alias, session.status, session.group_id
                );
            }
            Ok(())
        }

        Commands::Parse { line: Some(line) } => print_parsed(&line),

        Commands::Parse { line: None } => {
            for line in std::io::stdin().lock().lines() {
                print_parsed(&line?)?;
            }
            Ok(())
        }

        Commands::Config(ConfigCommands::Path) => {
            match paths::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No configuration directory on this platform"),
            }
            Ok(())
        }

        Commands::Config(ConfigCommands::Show) => {
            println!("{config:#?}");
            Ok(())
        }

        Commands::Config(ConfigCommands::Init) => {
            let dir = paths::ensure_config_dir()?
                .ok_or_else(|| Error::Config("No configuration directory on this platform".to_string()))?;
            write_default_config(&dir.join("config.toml"))
        }
    }
}

fn print_parsed(line: &str) -> Result<()> {
    println!("{}", render_parsed(line)?);
    Ok(())
}

fn render_parsed(line: &str) -> Result<String> {
    let record = parse_record(line).ok_or_else(|| Error::Parse {
        line: line.to_string(),
    })?;
    Ok(serde_json::to_string(&record)?)
}

fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        println!("Configuration already exists at {}", path.display());
        return Ok(());
    }
    std::fs::write(path, DEFAULT_CONFIG)?;
    println!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses_to_defaults() {
        let config = Config::parse(DEFAULT_CONFIG).unwrap();
        let defaults = Config::default();
        assert_eq!(config.debugger.path, defaults.debugger.path);
        assert_eq!(config.registry.url, defaults.registry.url);
        assert_eq!(config.session.run_mode, defaults.session.run_mode);
        assert_eq!(config.session.stop_at_entry, defaults.session.stop_at_entry);
    }

    #[test]
    fn test_render_parsed_record() {
        let json = render_parsed(r#"4^done,value="3""#).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["token"], 4);
        assert_eq!(value["results"][0][1], "3");
    }

    #[test]
    fn test_render_rejects_non_mi_line() {
        let err = render_parsed("warning: something odd").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert_eq!(err.to_string(), "Unhandled MI output: warning: something odd");
    }

    #[test]
    fn test_init_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[debugger]\npath = \"gdb\"\n").unwrap();
        write_default_config(&path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("gdb"));
    }
}
