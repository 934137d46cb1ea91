use super::protocol::FailurePoint;
use crate::checkpoint::CheckpointError;
use crate::persistence::PersistenceError;
use crate::resources::AllocationError;
use crate::run::{RunState, StateError};
use crate::workflow::NavigationError;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error("run budget exhausted before step `{step_id}`")]
    BudgetExhausted { step_id: String },
    #[error("permission denied for step `{step_id}`: {reason}")]
    PermissionDenied { step_id: String, reason: String },
    #[error("step `{step_id}` failed after {attempts} attempt(s): {message}")]
    StepFailed {
        step_id: String,
        attempts: u32,
        message: String,
    },
    #[error("run exceeded max steps ({max_steps})")]
    MaxStepsExceeded { max_steps: u32 },
    #[error("run cancelled: {reason}")]
    Cancelled { reason: String },
    #[error("run `{run_id}` cannot resume from state `{state}`")]
    NotResumable { run_id: String, state: RunState },
    #[error("no checkpoint available for run `{run_id}`")]
    NoCheckpoint { run_id: String },
    #[error("run id generation failed: {0}")]
    Id(String),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl ExecutionError {
    pub fn failure_point(&self) -> FailurePoint {
        match self {
            Self::Navigation(_) | Self::MaxStepsExceeded { .. } => FailurePoint::Navigation,
            Self::Allocation(_) | Self::BudgetExhausted { .. } => FailurePoint::Allocation,
            Self::PermissionDenied { .. } => FailurePoint::Permission,
            Self::StepFailed { .. } => FailurePoint::Execution,
            Self::Cancelled { .. } => FailurePoint::Cancelled,
            Self::NotResumable { .. }
            | Self::NoCheckpoint { .. }
            | Self::Id(_)
            | Self::Checkpoint(_) => FailurePoint::Initialization,
            Self::State(StateError::Persistence(_)) | Self::Persistence(_) => {
                FailurePoint::Persistence
            }
            Self::State(_) => FailurePoint::Initialization,
        }
    }
}
