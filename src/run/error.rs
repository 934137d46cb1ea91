use super::state::RunState;
use crate::checkpoint::CheckpointError;
use crate::persistence::PersistenceError;
use crate::resources::AllocationError;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("run `{run_id}` state transition `{from}` -> `{to}` is invalid")]
    InvalidTransition {
        run_id: String,
        from: RunState,
        to: RunState,
    },
    #[error("run `{run_id}` has not been initialized for execution")]
    NotInitialized { run_id: String },
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}
