use super::{PersistenceError, RunPersistence, RunStatusRecord};
use crate::checkpoint::Checkpoint;
use crate::run::RunContext;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    checkpoints: HashMap<String, Vec<Checkpoint>>,
    states: HashMap<String, RunStatusRecord>,
    contexts: HashMap<String, RunContext>,
}

/// Process-local store. Every read hands back clones.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    tables: Mutex<Tables>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, PersistenceError> {
        self.tables.lock().map_err(|_| PersistenceError::LockPoisoned)
    }

    pub fn checkpoint_count(&self, run_id: &str) -> usize {
        self.lock()
            .map(|tables| tables.checkpoints.get(run_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl RunPersistence for MemoryRunStore {
    fn create_checkpoint(
        &self,
        run_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), PersistenceError> {
        let mut tables = self.lock()?;
        let entries = tables.checkpoints.entry(run_id.to_string()).or_default();
        entries.retain(|existing| existing.id != checkpoint.id);
        entries.push(checkpoint.clone());
        Ok(())
    }

    fn list_checkpoints(&self, run_id: &str) -> Result<Vec<Checkpoint>, PersistenceError> {
        let tables = self.lock()?;
        let mut out = tables.checkpoints.get(run_id).cloned().unwrap_or_default();
        Checkpoint::sort_newest_first(&mut out);
        Ok(out)
    }

    fn delete_checkpoint(
        &self,
        run_id: &str,
        checkpoint_id: &str,
    ) -> Result<bool, PersistenceError> {
        let mut tables = self.lock()?;
        let Some(entries) = tables.checkpoints.get_mut(run_id) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|existing| existing.id != checkpoint_id);
        Ok(entries.len() != before)
    }

    fn update_run_state(&self, record: &RunStatusRecord) -> Result<(), PersistenceError> {
        self.lock()?
            .states
            .insert(record.run_id.clone(), record.clone());
        Ok(())
    }

    fn load_run_state(&self, run_id: &str) -> Result<Option<RunStatusRecord>, PersistenceError> {
        Ok(self.lock()?.states.get(run_id).cloned())
    }

    fn update_context(&self, run_id: &str, context: &RunContext) -> Result<(), PersistenceError> {
        self.lock()?
            .contexts
            .insert(run_id.to_string(), context.clone());
        Ok(())
    }

    fn load_context(&self, run_id: &str) -> Result<Option<RunContext>, PersistenceError> {
        Ok(self.lock()?.contexts.get(run_id).cloned())
    }
}
