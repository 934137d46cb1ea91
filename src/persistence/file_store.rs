use super::error::{io_error, json_error};
use super::{ensure_identifier, PersistenceError, RunPersistence, RunStatusRecord};
use crate::checkpoint::Checkpoint;
use crate::run::RunContext;
use crate::shared::atomic_write_file;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// JSON documents under `<state_root>/runs/<run_id>/`.
#[derive(Debug, Clone)]
pub struct FileRunStore {
    state_root: PathBuf,
}

impl FileRunStore {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.state_root.join("runs").join(run_id)
    }

    fn state_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("state.json")
    }

    fn context_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("context.json")
    }

    fn checkpoints_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("checkpoints")
    }

    fn checkpoint_path(&self, run_id: &str, checkpoint_id: &str) -> PathBuf {
        self.checkpoints_dir(run_id)
            .join(format!("{checkpoint_id}.json"))
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let body = serde_json::to_vec_pretty(value).map_err(|source| json_error(path, source))?;
    atomic_write_file(path, &body).map_err(|source| io_error(path, source))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(source) if source.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(io_error(path, source)),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| json_error(path, source))
}

impl RunPersistence for FileRunStore {
    fn create_checkpoint(
        &self,
        run_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), PersistenceError> {
        ensure_identifier("run id", run_id)?;
        ensure_identifier("checkpoint id", &checkpoint.id)?;
        write_json(&self.checkpoint_path(run_id, &checkpoint.id), checkpoint)
    }

    fn list_checkpoints(&self, run_id: &str) -> Result<Vec<Checkpoint>, PersistenceError> {
        ensure_identifier("run id", run_id)?;
        let dir = self.checkpoints_dir(run_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error(&dir, source)),
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| io_error(&dir, source))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_temp = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with('.'));
            if is_temp || path.extension().and_then(|value| value.to_str()) != Some("json") {
                continue;
            }
            if let Some(checkpoint) = read_json::<Checkpoint>(&path)? {
                out.push(checkpoint);
            }
        }
        Checkpoint::sort_newest_first(&mut out);
        Ok(out)
    }

    fn delete_checkpoint(
        &self,
        run_id: &str,
        checkpoint_id: &str,
    ) -> Result<bool, PersistenceError> {
        ensure_identifier("run id", run_id)?;
        ensure_identifier("checkpoint id", checkpoint_id)?;
        let path = self.checkpoint_path(run_id, checkpoint_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(source) if source.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(io_error(&path, source)),
        }
    }

    fn update_run_state(&self, record: &RunStatusRecord) -> Result<(), PersistenceError> {
        ensure_identifier("run id", &record.run_id)?;
        write_json(&self.state_path(&record.run_id), record)
    }

    fn load_run_state(&self, run_id: &str) -> Result<Option<RunStatusRecord>, PersistenceError> {
        ensure_identifier("run id", run_id)?;
        read_json(&self.state_path(run_id))
    }

    fn update_context(&self, run_id: &str, context: &RunContext) -> Result<(), PersistenceError> {
        ensure_identifier("run id", run_id)?;
        write_json(&self.context_path(run_id), context)
    }

    fn load_context(&self, run_id: &str) -> Result<Option<RunContext>, PersistenceError> {
        ensure_identifier("run id", run_id)?;
        read_json(&self.context_path(run_id))
    }
}
