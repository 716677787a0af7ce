//! XDG base directories for node data and the global config file

use crate::error::ApiError;
use std::path::PathBuf;

const APP_DIR: &str = "bucketsync";

/// `$XDG_DATA_HOME`, falling back to `$HOME/.local/share`
pub fn data_home() -> Option<PathBuf> {
    if let Ok(xdg_data_home) = std::env::var("XDG_DATA_HOME") {
        if !xdg_data_home.is_empty() {
            return Some(PathBuf::from(xdg_data_home));
        }
    }

    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".local").join("share"))
}

/// `$XDG_CONFIG_HOME`, falling back to `$HOME/.config`
pub fn config_home() -> Result<PathBuf, ApiError> {
    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg_config_home.is_empty() {
            return Ok(PathBuf::from(xdg_config_home));
        }
    }

    let home = std::env::var("HOME").map_err(|_| {
        ApiError::ConfigError(
            "Could not determine XDG config home directory (HOME not set)".to_string(),
        )
    })?;
    Ok(PathBuf::from(home).join(".config"))
}

/// Default object store root: `$XDG_DATA_HOME/bucketsync/data`
pub fn default_data_root() -> Result<PathBuf, ApiError> {
    let data_home = data_home().ok_or_else(|| {
        ApiError::ConfigError(
            "Could not determine XDG data home directory (HOME not set)".to_string(),
        )
    })?;
    Ok(data_home.join(APP_DIR).join("data"))
}

/// `$XDG_CONFIG_HOME/bucketsync/config.toml`
pub fn global_config_path() -> Result<PathBuf, ApiError> {
    Ok(config_home()?.join(APP_DIR).join("config.toml"))
}
