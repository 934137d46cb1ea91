use crate::persistence::PersistenceError;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint `{checkpoint_id}` failed integrity validation: {reason}")]
    Integrity {
        checkpoint_id: String,
        reason: String,
    },
    #[error("checkpoint serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("checkpoint id generation failed: {0}")]
    Id(String),
}
