use crate::config::ConfigError;
use std::path::PathBuf;

pub const GLOBAL_STATE_DIR: &str = ".tierflow";
pub const ENGINE_SETTINGS_FILE_NAME: &str = "engine.yaml";

pub fn default_settings_path() -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME").ok_or(ConfigError::HomeDirectoryUnavailable)?;
    Ok(PathBuf::from(home)
        .join(GLOBAL_STATE_DIR)
        .join(ENGINE_SETTINGS_FILE_NAME))
}

pub fn default_state_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(GLOBAL_STATE_DIR)
        .join("state")
}
