//! Platform configuration and data paths
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/runwright/`, `~/.local/share/runwright/`
//! - macOS: `~/Library/Application Support/runwright/`
//! - Windows: `%APPDATA%\runwright\`

use std::io;
use std::path::{Path, PathBuf};

/// Name used for the project directories
const APP_NAME: &str = "runwright";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("logs"))
}

/// Default directory for failure screenshots and JSON reports
pub fn artifacts_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("artifacts"))
}

/// Create a directory (and parents) if it does not exist yet
pub fn ensure_dir(dir: &Path) -> io::Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(dir.to_path_buf())
}

/// Turn a test id into something safe to use as a file name
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
