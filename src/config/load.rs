use super::{default_settings_path, ConfigError, EngineSettings};
use std::path::Path;

/// Reads and validates settings from `path`.
pub fn load_settings(path: &Path) -> Result<EngineSettings, ConfigError> {
    let settings = EngineSettings::from_path(path)?;
    settings.validate()?;
    Ok(settings)
}

/// Loads `~/.tierflow/engine.yaml`, falling back to defaults when the file
/// does not exist.
pub fn load_default_settings() -> Result<EngineSettings, ConfigError> {
    let path = default_settings_path()?;
    if !path.exists() {
        let settings = EngineSettings::default();
        settings.validate()?;
        return Ok(settings);
    }
    load_settings(&path)
}
