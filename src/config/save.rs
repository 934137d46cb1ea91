use super::{ConfigError, EngineSettings};
use crate::shared::atomic_write_file;
use std::fs;
use std::path::Path;

fn create_parent_dir(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

pub fn save_settings(settings: &EngineSettings, path: &Path) -> Result<(), ConfigError> {
    settings.validate()?;
    create_parent_dir(path)?;
    let body = serde_yaml::to_string(settings).map_err(|source| ConfigError::Encode {
        path: path.display().to_string(),
        source,
    })?;
    atomic_write_file(path, body.as_bytes()).map_err(|source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_settings;
    use tempfile::tempdir;

    #[test]
    fn saved_settings_load_back_unchanged() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("nested/engine.yaml");
        let mut settings = EngineSettings::default();
        settings.state_root = temp.path().join("state");
        settings.checkpoints.max_per_run = 3;
        settings.admission.max_active = 7;

        save_settings(&settings, &path).expect("save settings");
        let loaded = load_settings(&path).expect("load settings");
        assert_eq!(loaded, settings);
    }

    #[test]
    fn invalid_settings_are_not_written() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("engine.yaml");
        let mut settings = EngineSettings::default();
        settings.checkpoints.max_per_run = 0;

        save_settings(&settings, &path).expect_err("validation should fail");
        assert!(!path.exists());
    }
}
