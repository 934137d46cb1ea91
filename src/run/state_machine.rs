use super::context::RunContext;
use super::error::StateError;
use super::model::{BranchRecord, JoinRecord, Run, RunProgress};
use super::state::RunState;
use crate::checkpoint::{Checkpoint, CheckpointManager, CheckpointOptions, RestoreOptions};
use crate::persistence::{RunPersistence, RunStatusRecord};
use crate::resources::{AllocationError, ResourceAllocator, ResourceAmounts, ResourceLimits, ResourceUsage, UsageStats};
use crate::shared::EngineLog;
use crate::workflow::Location;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResourceUsage {
    pub credits: u64,
    pub tokens: u64,
    pub memory_mb: u64,
    pub steps_executed: u32,
    pub duration_ms: u64,
}

/// Authoritative lifecycle of one run.
///
/// Owns the run record and its allocation tree; every transition is written
/// through `RunPersistence` before the call returns.
pub struct RunStateMachine {
    run: Run,
    allocator: ResourceAllocator,
    allocation_id: String,
    persistence: Arc<dyn RunPersistence>,
    log: EngineLog,
    initialized: bool,
    steps_executed: u32,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    reason: Option<String>,
    result: Map<String, Value>,
}

impl std::fmt::Debug for RunStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStateMachine")
            .field("run", &self.run)
            .field("allocation_id", &self.allocation_id)
            .field("steps_executed", &self.steps_executed)
            .finish_non_exhaustive()
    }
}

impl RunStateMachine {
    pub fn new(run: Run, persistence: Arc<dyn RunPersistence>, log: EngineLog) -> Self {
        let allocation_id = format!("run:{}", run.id);
        Self {
            allocator: ResourceAllocator::new(log.clone()),
            run,
            allocation_id,
            persistence,
            log,
            initialized: false,
            steps_executed: 0,
            started_at: None,
            finished_at: None,
            reason: None,
            result: Map::new(),
        }
    }

    pub fn with_allocator(mut self, allocator: ResourceAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn into_run(self) -> Run {
        self.run
    }

    pub fn state(&self) -> RunState {
        self.run.state
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn result(&self) -> &Map<String, Value> {
        &self.result
    }

    pub fn allocation_id(&self) -> &str {
        &self.allocation_id
    }

    pub fn allocator(&self) -> &ResourceAllocator {
        &self.allocator
    }

    /// Creates the run's top-level allocation and resets the run to `Idle`.
    pub fn initialize_execution(&mut self, limits: ResourceLimits, now: i64) -> Result<(), StateError> {
        self.allocator
            .create_allocation(&self.allocation_id, limits, None)?;
        self.initialized = true;
        self.run.state = RunState::Idle;
        self.run.updated_at = now;
        self.persist_state(now)?;
        Ok(())
    }

    pub fn start(&mut self, now: i64) -> Result<(), StateError> {
        self.ensure_initialized()?;
        self.transition(RunState::Running, None, now)?;
        self.started_at.get_or_insert(now);
        Ok(())
    }

    pub fn pause(&mut self, now: i64) -> Result<(), StateError> {
        self.transition(RunState::Paused, None, now)
    }

    pub fn resume(&mut self, now: i64) -> Result<(), StateError> {
        self.transition(RunState::Running, None, now)
    }

    pub fn stop(&mut self, reason: Option<&str>, now: i64) -> Result<(), StateError> {
        self.transition(RunState::Stopped, reason.map(str::to_string), now)?;
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn complete(&mut self, result: Map<String, Value>, now: i64) -> Result<(), StateError> {
        if !self.run.state.can_transition_to(RunState::Completed) {
            return Err(self.invalid(RunState::Completed));
        }
        let progress = &mut self.run.progress;
        let prior_skipped = progress.skipped_steps;
        progress.skipped_steps = progress
            .total_steps
            .saturating_sub(progress.completed_steps)
            .saturating_sub(progress.failed_steps);
        let prior_result = std::mem::replace(&mut self.result, result);
        if let Err(err) = self.transition(RunState::Completed, None, now) {
            self.run.progress.skipped_steps = prior_skipped;
            self.result = prior_result;
            return Err(err);
        }
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, message: &str, now: i64) -> Result<(), StateError> {
        self.transition(RunState::Failed, Some(message.to_string()), now)?;
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn can_proceed(&self) -> bool {
        self.run.state == RunState::Running
    }

    pub fn add_credits_used(&mut self, credits: u64) -> bool {
        self.record_usage(&ResourceAmounts::credits(credits))
    }

    pub fn record_usage(&mut self, usage: &ResourceUsage) -> bool {
        self.allocator.track_usage(&self.allocation_id, usage)
    }

    pub fn increment_step_count(&mut self) {
        self.steps_executed = self.steps_executed.saturating_add(1);
    }

    pub fn steps_executed(&self) -> u32 {
        self.steps_executed
    }

    pub fn consumed(&self) -> ResourceUsage {
        self.allocator
            .allocation(&self.allocation_id)
            .map(|allocation| allocation.consumed)
            .unwrap_or_default()
    }

    pub fn available(&self) -> ResourceAmounts {
        self.allocator
            .available(&self.allocation_id)
            .unwrap_or_default()
    }

    pub fn usage_stats(&self) -> Option<UsageStats> {
        self.allocator.usage_stats(&self.allocation_id)
    }

    pub fn resource_usage(&self, now: i64) -> RunResourceUsage {
        let consumed = self.consumed();
        let end = self.finished_at.unwrap_or(now);
        let duration_ms = self
            .started_at
            .map(|started| end.saturating_sub(started).max(0) as u64)
            .unwrap_or(0);
        RunResourceUsage {
            credits: consumed.credits,
            tokens: consumed.tokens,
            memory_mb: consumed.memory_mb,
            steps_executed: self.steps_executed,
            duration_ms,
        }
    }

    pub fn can_allocate(&self, request: &ResourceAmounts) -> bool {
        self.allocator.can_allocate(&self.allocation_id, request)
    }

    /// Reserves a child budget of the run allocation for one step.
    pub fn open_step_allocation(&mut self, id: &str, limits: ResourceLimits) -> Result<(), AllocationError> {
        let parent = self.allocation_id.clone();
        self.allocator.create_allocation(id, limits, Some(&parent))
    }

    pub fn track_step_usage(&mut self, id: &str, usage: &ResourceUsage) -> bool {
        self.allocator.track_usage(id, usage)
    }

    pub fn release_step_allocation(&mut self, id: &str) -> bool {
        self.allocator.release_allocation(id)
    }

    pub fn context(&self) -> &RunContext {
        &self.run.context
    }

    pub fn progress(&self) -> &RunProgress {
        &self.run.progress
    }

    pub fn set_total_steps(&mut self, total: u32) {
        self.run.progress.total_steps = total;
    }

    pub fn set_current_location(&mut self, location: Option<Location>) {
        self.run.progress.current_location = location;
    }

    pub fn set_pending_locations(&mut self, pending: Vec<Location>) {
        self.run.progress.location_stack = pending;
    }

    pub fn record_step_completed(&mut self) {
        self.run.progress.completed_steps = self.run.progress.completed_steps.saturating_add(1);
    }

    pub fn record_step_failed(&mut self) {
        self.run.progress.failed_steps = self.run.progress.failed_steps.saturating_add(1);
    }

    pub fn upsert_branch(&mut self, record: BranchRecord) {
        match self.run.progress.branch_mut(&record.branch_id) {
            Some(existing) => *existing = record,
            None => self.run.progress.branches.push(record),
        }
    }

    /// Records that `from` reached `location`. Returns true once `location`
    /// has heard from `required` distinct sources; its record is then dropped.
    pub fn record_arrival(&mut self, location: &Location, from: &Location, required: u32) -> bool {
        if required <= 1 {
            return true;
        }
        let joins = &mut self.run.progress.joins;
        let index = match joins.iter().position(|join| join.location == *location) {
            Some(index) => index,
            None => {
                joins.push(JoinRecord {
                    location: location.clone(),
                    arrived_from: Vec::new(),
                    required,
                });
                joins.len() - 1
            }
        };
        let join = &mut joins[index];
        if !join.arrived_from.iter().any(|id| id == from.id()) {
            join.arrived_from.push(from.id().to_string());
        }
        if join.is_ready() {
            joins.remove(index);
            return true;
        }
        false
    }

    /// Removes and returns the oldest waiting join in `branch_id`.
    pub fn release_waiting_join(&mut self, branch_id: Option<&str>) -> Option<JoinRecord> {
        let joins = &mut self.run.progress.joins;
        let index = joins
            .iter()
            .position(|join| join.location.branch_id() == branch_id)?;
        Some(joins.remove(index))
    }

    /// Stores step outputs under the blackboard key `step_id` and copies each
    /// output into the run variables.
    pub fn merge_step_outputs(&mut self, step_id: &str, outputs: &Map<String, Value>) {
        for (key, value) in outputs {
            self.run.context.variables.insert(key.clone(), value.clone());
        }
        self.run
            .context
            .blackboard
            .insert(step_id.to_string(), Value::Object(outputs.clone()));
    }

    pub fn persist_context(&self) -> Result<(), StateError> {
        self.persistence
            .update_context(&self.run.id, &self.run.context)?;
        Ok(())
    }

    pub fn persist_state(&self, now: i64) -> Result<(), StateError> {
        self.persistence
            .update_run_state(&self.status_record(self.run.state, self.reason.clone(), now))?;
        Ok(())
    }

    fn status_record(&self, state: RunState, reason: Option<String>, now: i64) -> RunStatusRecord {
        RunStatusRecord {
            run_id: self.run.id.clone(),
            state,
            reason,
            progress: self.run.progress.clone(),
            consumed: self.consumed(),
            steps_executed: self.steps_executed,
            updated_at: now,
        }
    }

    pub fn checkpoint(
        &self,
        manager: &CheckpointManager,
        options: CheckpointOptions,
        now: i64,
    ) -> Result<Checkpoint, StateError> {
        Ok(manager.create_checkpoint_with_usage(
            &self.run,
            self.consumed(),
            self.steps_executed,
            options,
            now,
        )?)
    }

    /// Applies a checkpoint to a freshly initialized machine, replaying the
    /// recorded consumption into the run allocation.
    pub fn restore_checkpoint(
        &mut self,
        manager: &CheckpointManager,
        checkpoint: &Checkpoint,
        options: RestoreOptions,
        now: i64,
    ) -> Result<(), StateError> {
        self.ensure_initialized()?;
        manager.restore_checkpoint(&mut self.run, checkpoint, options, now)?;
        if !checkpoint.consumed.is_zero() {
            self.allocator
                .track_usage(&self.allocation_id, &checkpoint.consumed);
        }
        self.steps_executed = checkpoint.steps_executed;
        if self.run.state != RunState::Idle {
            self.started_at.get_or_insert(now);
        }
        self.persist_state(now)?;
        self.persist_context()?;
        self.log.info(
            "run.restored",
            &[
                ("runId", Value::String(self.run.id.clone())),
                ("checkpointId", Value::String(checkpoint.id.clone())),
                ("state", Value::String(self.run.state.to_string())),
            ],
        );
        Ok(())
    }

    /// Releases the run allocation and every step allocation under it.
    pub fn release_resources(&mut self) -> bool {
        let id = self.allocation_id.clone();
        self.allocator.release_allocation(&id)
    }

    fn ensure_initialized(&self) -> Result<(), StateError> {
        if self.initialized {
            return Ok(());
        }
        Err(StateError::NotInitialized {
            run_id: self.run.id.clone(),
        })
    }

    fn invalid(&self, to: RunState) -> StateError {
        StateError::InvalidTransition {
            run_id: self.run.id.clone(),
            from: self.run.state,
            to,
        }
    }

    fn transition(&mut self, next: RunState, reason: Option<String>, now: i64) -> Result<(), StateError> {
        let from = self.run.state;
        if !from.can_transition_to(next) {
            return Err(self.invalid(next));
        }
        let reason = reason.or_else(|| self.reason.clone());
        self.persistence
            .update_run_state(&self.status_record(next, reason.clone(), now))?;
        self.run.state = next;
        self.run.updated_at = now;
        self.reason = reason;
        self.log.info(
            "run.transition",
            &[
                ("runId", Value::String(self.run.id.clone())),
                ("from", Value::String(from.to_string())),
                ("to", Value::String(next.to_string())),
                (
                    "reason",
                    self.reason.clone().map(Value::String).unwrap_or(Value::Null),
                ),
            ],
        );
        Ok(())
    }
}
