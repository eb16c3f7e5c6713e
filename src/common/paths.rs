use std::path::PathBuf;
use directories::ProjectDirs;
use crate::common::{RollcallError, Result};

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/rollcall/rollcall.toml")
}

pub fn system_models_dir() -> PathBuf {
    PathBuf::from("/usr/share/rollcall/models")
}

/// Per-user data directory, e.g. `~/.local/share/rollcall`.
pub fn user_data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("org", "rollcall", "rollcall")
        .ok_or_else(|| RollcallError::Storage("Failed to get project dirs".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn user_config_file() -> Option<PathBuf> {
    ProjectDirs::from("org", "rollcall", "rollcall")
        .map(|dirs| dirs.config_dir().join("rollcall.toml"))
}
