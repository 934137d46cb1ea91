pub mod error;
pub mod file_store;
pub mod memory_store;
pub mod sqlite_store;

pub use error::PersistenceError;
pub use file_store::FileRunStore;
pub use memory_store::MemoryRunStore;
pub use sqlite_store::SqliteRunStore;

use crate::checkpoint::Checkpoint;
use crate::resources::ResourceUsage;
use crate::run::{RunContext, RunProgress, RunState};
use serde::{Deserialize, Serialize};

/// Durable view of a run's state machine, written on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusRecord {
    pub run_id: String,
    pub state: RunState,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub progress: RunProgress,
    #[serde(default)]
    pub consumed: ResourceUsage,
    #[serde(default)]
    pub steps_executed: u32,
    pub updated_at: i64,
}

/// Storage consumed by the run state machine and checkpoint manager.
///
/// `list_checkpoints` returns newest first. A failed `create_checkpoint`
/// must leave previously stored checkpoints untouched.
pub trait RunPersistence: Send + Sync {
    fn create_checkpoint(&self, run_id: &str, checkpoint: &Checkpoint)
        -> Result<(), PersistenceError>;

    fn list_checkpoints(&self, run_id: &str) -> Result<Vec<Checkpoint>, PersistenceError>;

    fn delete_checkpoint(&self, run_id: &str, checkpoint_id: &str)
        -> Result<bool, PersistenceError>;

    fn update_run_state(&self, record: &RunStatusRecord) -> Result<(), PersistenceError>;

    fn load_run_state(&self, run_id: &str) -> Result<Option<RunStatusRecord>, PersistenceError>;

    fn update_context(&self, run_id: &str, context: &RunContext) -> Result<(), PersistenceError>;

    fn load_context(&self, run_id: &str) -> Result<Option<RunContext>, PersistenceError>;
}

pub(crate) fn ensure_identifier(kind: &str, value: &str) -> Result<(), PersistenceError> {
    crate::shared::validate_identifier_value(kind, value).map_err(PersistenceError::InvalidIdentifier)
}
