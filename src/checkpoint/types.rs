use crate::resources::ResourceUsage;
use crate::run::{RunContext, RunProgress, RunState};
use serde::{Deserialize, Serialize};

/// Snapshot of one run. `progress` and `context` are owned copies taken at
/// creation; nothing here borrows from or points into the live run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: String,
    pub run_id: String,
    pub created_at: i64,
    /// Per-run creation counter; orders checkpoints created in the same millisecond.
    #[serde(default)]
    pub sequence: u64,
    pub state: RunState,
    #[serde(default)]
    pub progress: Option<RunProgress>,
    #[serde(default)]
    pub context: Option<RunContext>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub consumed: ResourceUsage,
    #[serde(default)]
    pub steps_executed: u32,
}

impl Checkpoint {
    /// Newest first: later `created_at`, then higher `sequence`.
    pub fn sort_newest_first(checkpoints: &mut [Checkpoint]) {
        checkpoints.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.sequence.cmp(&a.sequence))
        });
    }

    pub fn age_ms(&self, now: i64) -> i64 {
        now.saturating_sub(self.created_at).max(0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointOptions {
    pub compress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOptions {
    pub validate: bool,
    pub merge_context: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            validate: true,
            merge_context: false,
        }
    }
}

pub const DEFAULT_MAX_CHECKPOINTS_PER_RUN: usize = 10;
pub const DEFAULT_CHECKPOINT_TTL_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPolicy {
    pub max_per_run: usize,
    pub ttl_ms: i64,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            max_per_run: DEFAULT_MAX_CHECKPOINTS_PER_RUN,
            ttl_ms: DEFAULT_CHECKPOINT_TTL_MS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSummary {
    pub count: usize,
    pub total_size_bytes: u64,
    #[serde(default)]
    pub oldest_at: Option<i64>,
    #[serde(default)]
    pub newest_at: Option<i64>,
}
