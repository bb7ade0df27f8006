//! Configuration and log locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/mi-bridge/` and `~/.local/share/mi-bridge/logs/`
//! - macOS: `~/Library/Application Support/mi-bridge/`
//! - Windows: `%APPDATA%\mi-bridge\`

use std::io;
use std::path::PathBuf;

const APP_NAME: &str = "mi-bridge";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

pub fn log_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("logs"))
}

/// Ensure the configuration directory exists
pub fn ensure_config_dir() -> io::Result<Option<PathBuf>> {
    match config_dir() {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            Ok(Some(dir))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_is_toml_in_app_dir() {
        if let Some(path) = config_path() {
            assert!(path.ends_with("config.toml"));
            assert!(path.to_string_lossy().contains(APP_NAME));
        }
    }

    #[test]
    fn test_log_dir_under_app_dir() {
        if let Some(dir) = log_dir() {
            assert!(dir.ends_with("logs"));
        }
    }
}
