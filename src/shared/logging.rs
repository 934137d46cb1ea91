use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn engine_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/engine.log")
}

pub fn admission_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/admission.log")
}

/// Append-only JSON-lines log handle.
///
/// Logging is advisory: a missing path, an unwritable file or an encoding
/// failure drops the line instead of surfacing an error to the caller.
#[derive(Debug, Clone, Default)]
pub struct EngineLog {
    path: Option<PathBuf>,
    label: Option<String>,
}

impl EngineLog {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn info(&self, event: &str, fields: &[(&str, Value)]) {
        self.append("info", event, fields);
    }

    pub fn warn(&self, event: &str, fields: &[(&str, Value)]) {
        self.append("warn", event, fields);
    }

    pub fn error(&self, event: &str, fields: &[(&str, Value)]) {
        self.append("error", event, fields);
    }

    fn append(&self, level: &str, event: &str, fields: &[(&str, Value)]) {
        let Some(path) = self.path.as_ref() else {
            return;
        };

        let mut payload = Map::new();
        payload.insert(
            "timestamp".to_string(),
            Value::from(super::time::now_millis()),
        );
        payload.insert("level".to_string(), Value::String(level.to_string()));
        payload.insert("event".to_string(), Value::String(event.to_string()));
        if let Some(label) = self.label.as_ref() {
            payload.insert("label".to_string(), Value::String(label.clone()));
        }
        for (key, value) in fields {
            payload.insert((*key).to_string(), value.clone());
        }

        let Ok(line) = serde_json::to_string(&payload) else {
            return;
        };
        if let Some(parent) = path.parent() {
            if fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) else {
            return;
        };
        let _ = writeln!(file, "{line}");
    }
}

pub fn read_log_lines(path: &Path) -> Vec<Value> {
    let Ok(raw) = fs::read_to_string(path) else {
        return Vec::new();
    };
    raw.lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}
