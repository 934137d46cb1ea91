use super::digest::{checkpoint_digest, ContextCompressor, NoCompression};
use super::error::CheckpointError;
use super::types::{Checkpoint, CheckpointOptions, CheckpointPolicy, CheckpointSummary, RestoreOptions};
use crate::persistence::RunPersistence;
use crate::resources::ResourceUsage;
use crate::run::Run;
use crate::shared::{generate_compact_id, EngineLog};
use serde_json::Value;
use std::sync::Arc;

pub struct CheckpointManager {
    store: Arc<dyn RunPersistence>,
    policy: CheckpointPolicy,
    compressor: Arc<dyn ContextCompressor>,
    log: EngineLog,
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn RunPersistence>, log: EngineLog) -> Self {
        Self {
            store,
            policy: CheckpointPolicy::default(),
            compressor: Arc::new(NoCompression),
            log,
        }
    }

    pub fn with_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn ContextCompressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn policy(&self) -> CheckpointPolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<dyn RunPersistence> {
        &self.store
    }

    pub fn create_checkpoint(
        &self,
        run: &Run,
        options: CheckpointOptions,
        now: i64,
    ) -> Result<Checkpoint, CheckpointError> {
        self.create_checkpoint_with_usage(run, ResourceUsage::default(), 0, options, now)
    }

    /// Snapshots `run`, persists it and then prunes old checkpoints.
    pub fn create_checkpoint_with_usage(
        &self,
        run: &Run,
        consumed: ResourceUsage,
        steps_executed: u32,
        options: CheckpointOptions,
        now: i64,
    ) -> Result<Checkpoint, CheckpointError> {
        let sequence = self
            .store
            .list_checkpoints(&run.id)?
            .iter()
            .map(|existing| existing.sequence + 1)
            .max()
            .unwrap_or(0);
        let context = if options.compress {
            self.compressor.compress(&run.context)
        } else {
            run.context.clone()
        };

        let mut checkpoint = Checkpoint {
            id: generate_compact_id("ckpt", now).map_err(CheckpointError::Id)?,
            run_id: run.id.clone(),
            created_at: now,
            sequence,
            state: run.state,
            progress: Some(run.progress.clone()),
            context: Some(context),
            size_bytes: 0,
            digest: String::new(),
            compressed: options.compress,
            consumed,
            steps_executed,
        };
        checkpoint.digest = checkpoint_digest(&checkpoint)?;
        checkpoint.size_bytes = serde_json::to_vec(&checkpoint)?.len() as u64;

        self.store.create_checkpoint(&run.id, &checkpoint)?;
        self.prune(&run.id, now)?;
        Ok(checkpoint)
    }

    /// Removes checkpoints beyond the newest `max_per_run`, but only those
    /// older than the TTL.
    pub fn prune(&self, run_id: &str, now: i64) -> Result<usize, CheckpointError> {
        let checkpoints = self.store.list_checkpoints(run_id)?;
        let mut removed = Vec::new();
        for checkpoint in checkpoints.iter().skip(self.policy.max_per_run) {
            if checkpoint.age_ms(now) > self.policy.ttl_ms
                && self.store.delete_checkpoint(run_id, &checkpoint.id)?
            {
                removed.push(Value::String(checkpoint.id.clone()));
            }
        }
        let count = removed.len();
        if count > 0 {
            self.log.info(
                "checkpoint.pruned",
                &[
                    ("runId", Value::String(run_id.to_string())),
                    ("removed", Value::Array(removed)),
                ],
            );
        }
        Ok(count)
    }

    pub fn validate(&self, checkpoint: &Checkpoint, run_id: &str, now: i64) -> Result<(), CheckpointError> {
        let fail = |reason: String| CheckpointError::Integrity {
            checkpoint_id: checkpoint.id.clone(),
            reason,
        };
        if checkpoint.id.trim().is_empty() {
            return Err(fail("missing checkpoint id".to_string()));
        }
        if checkpoint.run_id.trim().is_empty() {
            return Err(fail("missing run id".to_string()));
        }
        if checkpoint.run_id != run_id {
            return Err(fail(format!(
                "belongs to run `{}`, not `{run_id}`",
                checkpoint.run_id
            )));
        }
        let age = checkpoint.age_ms(now);
        if age > self.policy.ttl_ms {
            return Err(fail(format!(
                "expired: age {age}ms exceeds ttl {}ms",
                self.policy.ttl_ms
            )));
        }
        if checkpoint.progress.is_none() {
            return Err(fail("missing progress".to_string()));
        }
        if checkpoint.context.is_none() {
            return Err(fail("missing context".to_string()));
        }
        let expected = checkpoint_digest(checkpoint)?;
        if checkpoint.digest != expected {
            return Err(fail("digest mismatch".to_string()));
        }
        Ok(())
    }

    /// Applies `checkpoint` to `run`. On any error the run is left untouched.
    pub fn restore_checkpoint(
        &self,
        run: &mut Run,
        checkpoint: &Checkpoint,
        options: RestoreOptions,
        now: i64,
    ) -> Result<(), CheckpointError> {
        if options.validate {
            self.validate(checkpoint, &run.id, now)?;
        }
        let missing = |what: &str| CheckpointError::Integrity {
            checkpoint_id: checkpoint.id.clone(),
            reason: format!("missing {what}"),
        };
        let progress = checkpoint.progress.clone().ok_or_else(|| missing("progress"))?;
        let context = checkpoint.context.as_ref().ok_or_else(|| missing("context"))?;

        run.state = checkpoint.state;
        run.progress = progress;
        run.context = if options.merge_context {
            run.context.merged_with(context)
        } else {
            context.clone()
        };
        run.updated_at = now;
        Ok(())
    }

    pub fn last_checkpoint(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.store.list_checkpoints(run_id)?.into_iter().next())
    }

    pub fn list_checkpoints(
        &self,
        run_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Checkpoint>, CheckpointError> {
        let mut checkpoints = self.store.list_checkpoints(run_id)?;
        if let Some(limit) = limit {
            checkpoints.truncate(limit);
        }
        Ok(checkpoints)
    }

    pub fn checkpoint_summary(&self, run_id: &str) -> Result<CheckpointSummary, CheckpointError> {
        let checkpoints = self.store.list_checkpoints(run_id)?;
        Ok(CheckpointSummary {
            count: checkpoints.len(),
            total_size_bytes: checkpoints.iter().map(|c| c.size_bytes).sum(),
            oldest_at: checkpoints.iter().map(|c| c.created_at).min(),
            newest_at: checkpoints.iter().map(|c| c.created_at).max(),
        })
    }
}
