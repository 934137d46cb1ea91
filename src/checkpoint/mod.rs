pub mod digest;
pub mod error;
pub mod manager;
pub mod types;

pub use digest::{checkpoint_digest, ContextCompressor, DropNulls, NoCompression};
pub use error::CheckpointError;
pub use manager::CheckpointManager;
pub use types::{
    Checkpoint, CheckpointOptions, CheckpointPolicy, CheckpointSummary, RestoreOptions,
    DEFAULT_CHECKPOINT_TTL_MS, DEFAULT_MAX_CHECKPOINTS_PER_RUN,
};
