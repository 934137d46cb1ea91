use super::error::ExecutionError;
use super::events::{EventSink, NullEventSink, RunEvent};
use super::gate::{AllowAllGate, GateRequest, SecurityGate};
use super::protocol::{
    AllocationRequest, DelegationError, ExecutionInput, FailurePoint, RequestContext, TierDelegate,
    TierInput, TierRequest, TierResponse,
};
use crate::admission::{ActiveTaskRecord, ActiveTaskStore, RunControlTable, SharedTaskRegistry};
use crate::checkpoint::{Checkpoint, CheckpointManager, CheckpointOptions, RestoreOptions};
use crate::persistence::RunPersistence;
use crate::resources::{ResourceLimits, ResourceUsage};
use crate::run::{
    BranchRecord, BranchStatus, Run, RunContext, RunControl, RunResourceUsage, RunState,
    RunStateMachine,
};
use crate::shared::{generate_compact_id, now_millis, EngineLog};
use crate::workflow::{navigator_for, Location, Navigator, ParallelBranch, StepInfo, WorkflowDefinition};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

const MAX_STEP_ATTEMPTS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionSettings {
    pub default_budget: ResourceLimits,
    /// Ceiling for each step's sub-budget; `None` lets a step reserve
    /// everything the run has left.
    pub step_budget: Option<ResourceLimits>,
    /// Checkpoint after every N completed steps; 0 disables periodic
    /// checkpoints.
    pub checkpoint_interval_steps: u32,
    pub checkpoint_options: CheckpointOptions,
    pub validate_on_restore: bool,
    pub max_steps: u32,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            default_budget: ResourceLimits::new(1_000, 1_000_000, 60 * 60 * 1000, 4_096),
            step_budget: None,
            checkpoint_interval_steps: 1,
            checkpoint_options: CheckpointOptions::default(),
            validate_on_restore: true,
            max_steps: 1_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: Option<String>,
    pub user_id: String,
    pub has_premium: bool,
    pub parent_run_id: Option<String>,
    pub workflow: WorkflowDefinition,
    pub inputs: Map<String, Value>,
    pub budget: Option<ResourceLimits>,
    pub control: RunControl,
}

impl RunRequest {
    pub fn new(user_id: impl Into<String>, workflow: WorkflowDefinition) -> Self {
        Self {
            run_id: None,
            user_id: user_id.into(),
            has_premium: false,
            parent_run_id: None,
            workflow,
            inputs: Map::new(),
            budget: None,
            control: RunControl::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_budget(mut self, budget: ResourceLimits) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_premium(mut self, has_premium: bool) -> Self {
        self.has_premium = has_premium;
        self
    }

    pub fn with_parent_run_id(mut self, parent_run_id: impl Into<String>) -> Self {
        self.parent_run_id = Some(parent_run_id.into());
        self
    }

    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ResumeRequest {
    pub run_id: String,
    pub user_id: String,
    pub has_premium: bool,
    pub workflow: WorkflowDefinition,
    /// Checkpoint to resume from; the run's newest checkpoint when `None`.
    pub checkpoint: Option<Checkpoint>,
    pub budget: Option<ResourceLimits>,
    pub control: RunControl,
}

impl ResumeRequest {
    pub fn new(
        run_id: impl Into<String>,
        user_id: impl Into<String>,
        workflow: WorkflowDefinition,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            user_id: user_id.into(),
            has_premium: false,
            workflow,
            checkpoint: None,
            budget: None,
            control: RunControl::new(),
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn with_budget(mut self, budget: ResourceLimits) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub success: bool,
    pub state: RunState,
    pub outputs: Map<String, Value>,
    pub error: Option<String>,
    pub failure_point: Option<FailurePoint>,
    pub resource_usage: RunResourceUsage,
    pub last_checkpoint_id: Option<String>,
    pub run: Run,
}

enum DriveEnd {
    Exhausted,
    Paused,
}

struct Session {
    task_id: String,
    user_id: String,
    has_premium: bool,
    parent_run_id: Option<String>,
    control: RunControl,
}

/// Drives runs end to end, delegating each step to the next tier down.
pub struct TierExecutor {
    delegate: Arc<dyn TierDelegate>,
    persistence: Arc<dyn RunPersistence>,
    checkpoints: CheckpointManager,
    gate: Arc<dyn SecurityGate>,
    events: Arc<dyn EventSink>,
    admission: Option<SharedTaskRegistry>,
    controls: Option<RunControlTable>,
    settings: ExecutionSettings,
    log: EngineLog,
}

impl TierExecutor {
    pub fn new(
        delegate: Arc<dyn TierDelegate>,
        persistence: Arc<dyn RunPersistence>,
        log: EngineLog,
    ) -> Self {
        Self {
            checkpoints: CheckpointManager::new(persistence.clone(), log.clone()),
            delegate,
            persistence,
            gate: Arc::new(AllowAllGate),
            events: Arc::new(NullEventSink),
            admission: None,
            controls: None,
            settings: ExecutionSettings::default(),
            log,
        }
    }

    pub fn with_checkpoint_manager(mut self, checkpoints: CheckpointManager) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_security_gate(mut self, gate: Arc<dyn SecurityGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_admission(mut self, registry: SharedTaskRegistry) -> Self {
        self.admission = Some(registry);
        self
    }

    pub fn with_control_table(mut self, controls: RunControlTable) -> Self {
        self.controls = Some(controls);
        self
    }

    pub fn with_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn execute(&self, request: RunRequest) -> RunOutcome {
        let now = now_millis();
        let run_id = match request.run_id.clone() {
            Some(run_id) => run_id,
            None => match generate_compact_id("run", now) {
                Ok(run_id) => run_id,
                Err(message) => {
                    let run = Run::new("", &request.user_id, request.workflow.id(), now);
                    return self.reject_unstarted(run, ExecutionError::Id(message));
                }
            },
        };
        let run = Run::new(&run_id, &request.user_id, request.workflow.id(), now)
            .with_context(RunContext::with_variables(request.inputs.clone()));
        let mut machine = RunStateMachine::new(run, self.persistence.clone(), self.log.clone());
        let session = Session {
            task_id: run_id,
            user_id: request.user_id.clone(),
            has_premium: request.has_premium,
            parent_run_id: request.parent_run_id.clone(),
            control: request.control.clone(),
        };
        let budget = request.budget.unwrap_or(self.settings.default_budget);

        let result = self
            .begin(&mut machine, budget, &session, now)
            .and_then(|()| self.run_from_start(&mut machine, &request.workflow, &session));
        self.finish(machine, &session, result)
    }

    pub fn resume(&self, request: ResumeRequest) -> RunOutcome {
        let now = now_millis();
        let run = Run::new(&request.run_id, &request.user_id, request.workflow.id(), now);
        let mut machine = RunStateMachine::new(run, self.persistence.clone(), self.log.clone());
        let session = Session {
            task_id: request.run_id.clone(),
            user_id: request.user_id.clone(),
            has_premium: request.has_premium,
            parent_run_id: None,
            control: request.control.clone(),
        };
        let budget = request.budget.unwrap_or(self.settings.default_budget);

        let result = self
            .begin_resumed(&mut machine, &request, budget, &session, now)
            .and_then(|()| self.run_from_progress(&mut machine, &request.workflow, &session));
        self.finish(machine, &session, result)
    }

    fn begin(
        &self,
        machine: &mut RunStateMachine,
        budget: ResourceLimits,
        session: &Session,
        now: i64,
    ) -> Result<(), ExecutionError> {
        machine.initialize_execution(budget, now)?;
        self.register(machine.run(), session);
        self.events.emit(&RunEvent::Started {
            run_id: machine.run().id.clone(),
            workflow_id: machine.run().workflow_id.clone(),
            resumed: false,
        });
        machine.start(now)?;
        Ok(())
    }

    fn begin_resumed(
        &self,
        machine: &mut RunStateMachine,
        request: &ResumeRequest,
        budget: ResourceLimits,
        session: &Session,
        now: i64,
    ) -> Result<(), ExecutionError> {
        let checkpoint = match request.checkpoint.clone() {
            Some(checkpoint) => checkpoint,
            None => self
                .checkpoints
                .last_checkpoint(&request.run_id)?
                .ok_or_else(|| ExecutionError::NoCheckpoint {
                    run_id: request.run_id.clone(),
                })?,
        };
        if checkpoint.state.is_terminal() {
            return Err(ExecutionError::NotResumable {
                run_id: request.run_id.clone(),
                state: checkpoint.state,
            });
        }

        machine.initialize_execution(budget, now)?;
        machine.restore_checkpoint(
            &self.checkpoints,
            &checkpoint,
            RestoreOptions {
                validate: self.settings.validate_on_restore,
                merge_context: false,
            },
            now,
        )?;
        self.register(machine.run(), session);
        self.events.emit(&RunEvent::Started {
            run_id: machine.run().id.clone(),
            workflow_id: machine.run().workflow_id.clone(),
            resumed: true,
        });
        match machine.state() {
            RunState::Idle => machine.start(now)?,
            RunState::Paused => machine.resume(now)?,
            _ => {}
        }
        session.control.clear_pause();
        Ok(())
    }

    fn run_from_start(
        &self,
        machine: &mut RunStateMachine,
        workflow: &WorkflowDefinition,
        session: &Session,
    ) -> Result<DriveEnd, ExecutionError> {
        workflow.validate()?;
        let navigator = navigator_for(workflow)?;
        machine.set_total_steps(navigator.total_steps() as u32);

        let branches = navigator.parallel_branches();
        if !branches.is_empty() {
            for branch in &branches {
                machine.upsert_branch(BranchRecord {
                    branch_id: branch.id.clone(),
                    locations: Vec::new(),
                    status: BranchStatus::Pending,
                });
            }
            return self.drive_branches(machine, navigator.as_ref(), &branches, session);
        }

        let mut frontier = navigator.start_locations()?;
        frontier.reverse();
        self.drive(machine, navigator.as_ref(), frontier, None, session)
    }

    fn run_from_progress(
        &self,
        machine: &mut RunStateMachine,
        workflow: &WorkflowDefinition,
        session: &Session,
    ) -> Result<DriveEnd, ExecutionError> {
        workflow.validate()?;
        let navigator = navigator_for(workflow)?;
        if machine.progress().total_steps == 0 {
            machine.set_total_steps(navigator.total_steps() as u32);
        }

        let branches = navigator.parallel_branches();
        if !branches.is_empty() {
            return self.drive_branches(machine, navigator.as_ref(), &branches, session);
        }

        let frontier = match self.pending_frontier(machine, navigator.as_ref(), None)? {
            Some(frontier) => frontier,
            None => {
                let mut start = navigator.start_locations()?;
                start.reverse();
                start
            }
        };
        self.drive(machine, navigator.as_ref(), frontier, None, session)
    }

    /// Where a restored run continues: its pending stack, else the successors
    /// of its current location that are ready to run. `None` when it never
    /// recorded a location.
    fn pending_frontier(
        &self,
        machine: &mut RunStateMachine,
        navigator: &dyn Navigator,
        branch_id: Option<&str>,
    ) -> Result<Option<Vec<Location>>, ExecutionError> {
        let progress = machine.progress();
        let Some(current) = progress
            .current_location
            .clone()
            .filter(|location| location.branch_id() == branch_id)
        else {
            return Ok(None);
        };
        if !progress.location_stack.is_empty() {
            return Ok(Some(progress.location_stack.clone()));
        }
        let next = navigator.next_locations(&current, machine.context())?;
        let mut ready = admit_successors(machine, navigator, &current, next, &BTreeSet::new());
        ready.reverse();
        Ok(Some(ready))
    }

    fn drive_branches(
        &self,
        machine: &mut RunStateMachine,
        navigator: &dyn Navigator,
        branches: &[ParallelBranch],
        session: &Session,
    ) -> Result<DriveEnd, ExecutionError> {
        for branch in branches {
            let existing = machine
                .progress()
                .branches
                .iter()
                .find(|record| record.branch_id == branch.id)
                .cloned();
            let mut record = existing.unwrap_or(BranchRecord {
                branch_id: branch.id.clone(),
                locations: Vec::new(),
                status: BranchStatus::Pending,
            });
            if record.status == BranchStatus::Completed {
                continue;
            }

            let frontier = match record.status {
                BranchStatus::Running => self.pending_frontier(machine, navigator, Some(&branch.id))?,
                _ => None,
            }
            .unwrap_or_else(|| vec![branch.start.clone()]);

            record.status = BranchStatus::Running;
            machine.upsert_branch(record.clone());
            match self.drive(machine, navigator, frontier, Some(&branch.id), session) {
                Ok(DriveEnd::Exhausted) => {
                    let mut done = self.branch_record(machine, &branch.id, record);
                    done.status = BranchStatus::Completed;
                    machine.upsert_branch(done);
                    machine.set_current_location(None);
                    machine.set_pending_locations(Vec::new());
                }
                Ok(DriveEnd::Paused) => return Ok(DriveEnd::Paused),
                Err(err) => {
                    let mut failed = self.branch_record(machine, &branch.id, record);
                    failed.status = BranchStatus::Failed;
                    machine.upsert_branch(failed);
                    return Err(err);
                }
            }
        }
        Ok(DriveEnd::Exhausted)
    }

    fn branch_record(&self, machine: &RunStateMachine, branch_id: &str, fallback: BranchRecord) -> BranchRecord {
        machine
            .progress()
            .branches
            .iter()
            .find(|record| record.branch_id == branch_id)
            .cloned()
            .unwrap_or(fallback)
    }

    /// Runs locations depth-first until none remain. The next location to
    /// visit is the last one in `frontier`.
    fn drive(
        &self,
        machine: &mut RunStateMachine,
        navigator: &dyn Navigator,
        mut frontier: Vec<Location>,
        branch_id: Option<&str>,
        session: &Session,
    ) -> Result<DriveEnd, ExecutionError> {
        let mut visited = BTreeSet::new();
        loop {
            self.check_cancellation(session)?;
            if session.control.is_pause_requested() {
                return Ok(DriveEnd::Paused);
            }
            let Some(location) = frontier.pop() else {
                // Joins whose remaining inbound paths were never taken.
                let Some(join) = machine.release_waiting_join(branch_id) else {
                    return Ok(DriveEnd::Exhausted);
                };
                self.log.info(
                    "join.released",
                    &[
                        ("runId", Value::String(machine.run().id.clone())),
                        ("location", Value::String(join.location.id().to_string())),
                        ("arrivals", Value::from(join.arrived_from.len())),
                        ("required", Value::from(join.required)),
                    ],
                );
                frontier.push(join.location);
                machine.set_pending_locations(frontier.clone());
                continue;
            };
            if !visited.insert(location.id().to_string()) {
                continue;
            }
            if machine.steps_executed() >= self.settings.max_steps {
                return Err(ExecutionError::MaxStepsExceeded {
                    max_steps: self.settings.max_steps,
                });
            }

            machine.set_current_location(Some(location.clone()));
            machine.set_pending_locations(frontier.clone());
            self.run_step(machine, navigator, &location, session)?;

            let next = navigator.next_locations(&location, machine.context())?;
            let ready = admit_successors(machine, navigator, &location, next, &visited);
            frontier.extend(ready.into_iter().rev());
            machine.set_pending_locations(frontier.clone());
            if let Some(branch_id) = branch_id {
                let mut record = self.branch_record(
                    machine,
                    branch_id,
                    BranchRecord {
                        branch_id: branch_id.to_string(),
                        locations: Vec::new(),
                        status: BranchStatus::Running,
                    },
                );
                record.locations.push(location.clone());
                machine.upsert_branch(record);
            }
            machine.persist_state(now_millis())?;
            self.maybe_checkpoint(machine);
        }
    }

    fn run_step(
        &self,
        machine: &mut RunStateMachine,
        navigator: &dyn Navigator,
        location: &Location,
        session: &Session,
    ) -> Result<(), ExecutionError> {
        let info = navigator.step_info(location)?;
        let max_attempts = retry_attempts(&info.config);
        let mut attempt = 1;
        loop {
            match self.attempt_step(machine, &info, location, attempt, session) {
                Ok(outputs) => {
                    machine.merge_step_outputs(&info.id, &outputs);
                    machine.record_step_completed();
                    machine.persist_context()?;
                    return Ok(());
                }
                Err(ExecutionError::StepFailed { message, .. }) if attempt < max_attempts => {
                    self.log.warn(
                        "step.retry",
                        &[
                            ("runId", Value::String(machine.run().id.clone())),
                            ("stepId", Value::String(info.id.clone())),
                            ("attempt", Value::from(attempt)),
                            ("error", Value::String(message)),
                        ],
                    );
                    attempt += 1;
                }
                Err(err) => {
                    machine.record_step_failed();
                    return Err(err);
                }
            }
        }
    }

    fn attempt_step(
        &self,
        machine: &mut RunStateMachine,
        info: &StepInfo,
        location: &Location,
        attempt: u32,
        session: &Session,
    ) -> Result<Map<String, Value>, ExecutionError> {
        let run_id = machine.run().id.clone();
        let available = machine.available();
        if available.credits == 0 {
            return Err(ExecutionError::BudgetExhausted {
                step_id: info.id.clone(),
            });
        }
        let limits = match self.settings.step_budget {
            Some(ceiling) => ceiling.min(&available),
            None => available,
        };
        let allocation_id = format!("{}:step:{}:{attempt}", machine.allocation_id(), info.id);
        machine.open_step_allocation(&allocation_id, limits)?;

        if let Err(reason) = self.gate.check(&GateRequest {
            run_id: &run_id,
            user_id: &session.user_id,
            step: info,
        }) {
            machine.release_step_allocation(&allocation_id);
            return Err(ExecutionError::PermissionDenied {
                step_id: info.id.clone(),
                reason,
            });
        }

        self.events.emit(&RunEvent::StepStarted {
            run_id: run_id.clone(),
            step_id: info.id.clone(),
            attempt,
            location: location.clone(),
        });

        let request = self.execution_request(machine, info, &limits, session);
        let started = Instant::now();
        let response = self.delegate.execute(&request);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (mut usage, result) = match response {
            Ok(response) if response.success => (response.metadata.resource_usage, Ok(response.outputs)),
            Ok(response) => (
                response.metadata.resource_usage,
                Err(response
                    .error
                    .unwrap_or_else(|| "step reported failure".to_string())),
            ),
            Err(err) => (err.usage, Err(err.message)),
        };
        if usage.time_ms == 0 {
            usage.time_ms = elapsed_ms;
        }
        machine.track_step_usage(&allocation_id, &usage);
        machine.increment_step_count();
        machine.release_step_allocation(&allocation_id);

        match result {
            Ok(outputs) => {
                self.events.emit(&RunEvent::StepCompleted {
                    run_id,
                    step_id: info.id.clone(),
                    attempt,
                    usage,
                });
                Ok(outputs)
            }
            Err(message) => Err(ExecutionError::StepFailed {
                step_id: info.id.clone(),
                attempts: attempt,
                message,
            }),
        }
    }

    fn execution_request(
        &self,
        machine: &RunStateMachine,
        info: &StepInfo,
        limits: &ResourceLimits,
        session: &Session,
    ) -> TierRequest {
        let config_str = |key: &str| {
            info.config
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let mut options = Map::new();
        options.insert(
            "variables".to_string(),
            Value::Object(machine.context().variables.clone()),
        );
        options.insert("stepName".to_string(), Value::String(info.name.clone()));
        options.insert("config".to_string(), Value::Object(info.config.clone()));

        TierRequest {
            context: RequestContext {
                run_id: machine.run().id.clone(),
                user_id: session.user_id.clone(),
                parent_run_id: session.parent_run_id.clone(),
                timestamp: Some(now_millis()),
            },
            input: TierInput::Execution(ExecutionInput {
                step_id: info.id.clone(),
                step_type: info.step_type,
                tool_name: config_str("toolName"),
                parameters: info
                    .config
                    .get("parameters")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
                strategy: config_str("strategy"),
            }),
            allocation: AllocationRequest::from_limits(limits),
            options,
        }
    }

    fn check_cancellation(&self, session: &Session) -> Result<(), ExecutionError> {
        let control = &session.control;
        if control.is_evicted() || control.is_stop_requested() {
            return Err(ExecutionError::Cancelled {
                reason: control
                    .reason()
                    .unwrap_or_else(|| "stop requested".to_string()),
            });
        }
        if let Some(registry) = &self.admission {
            let present = registry
                .lock()
                .map(|registry| registry.contains(&session.task_id))
                .unwrap_or(true);
            if !present {
                return Err(ExecutionError::Cancelled {
                    reason: "removed from active task registry".to_string(),
                });
            }
        }
        Ok(())
    }

    fn maybe_checkpoint(&self, machine: &RunStateMachine) {
        let interval = self.settings.checkpoint_interval_steps;
        if interval == 0 || machine.progress().completed_steps % interval != 0 {
            return;
        }
        if let Err(err) = machine.checkpoint(
            &self.checkpoints,
            self.settings.checkpoint_options,
            now_millis(),
        ) {
            self.log.warn(
                "checkpoint.failed",
                &[
                    ("runId", Value::String(machine.run().id.clone())),
                    ("error", Value::String(err.to_string())),
                ],
            );
        }
    }

    fn register(&self, run: &Run, session: &Session) {
        if let Some(registry) = &self.admission {
            if let Ok(mut registry) = registry.lock() {
                registry.insert(ActiveTaskRecord::new(
                    &session.task_id,
                    &session.user_id,
                    session.has_premium,
                    now_millis(),
                ));
            }
        }
        if let Some(controls) = &self.controls {
            controls.register(&run.id, session.control.clone());
        }
    }

    fn unregister(&self, session: &Session) {
        if let Some(registry) = &self.admission {
            if let Ok(mut registry) = registry.lock() {
                registry.remove(&session.task_id);
            }
        }
        if let Some(controls) = &self.controls {
            controls.unregister(&session.task_id);
        }
    }

    fn finish(
        &self,
        mut machine: RunStateMachine,
        session: &Session,
        result: Result<DriveEnd, ExecutionError>,
    ) -> RunOutcome {
        let now = now_millis();
        let run_id = machine.run().id.clone();
        let (error, failure_point) = match result {
            Ok(DriveEnd::Exhausted) => {
                let outputs = machine.context().blackboard.clone();
                match machine.complete(outputs, now) {
                    Ok(()) => {
                        self.events.emit(&RunEvent::Completed {
                            run_id: run_id.clone(),
                            usage: machine.resource_usage(now),
                        });
                        (None, None)
                    }
                    Err(err) => self.fail_run(&mut machine, err.into(), now),
                }
            }
            Ok(DriveEnd::Paused) => match self.pause_run(&mut machine, now) {
                Ok(()) => (None, None),
                Err(err) => self.fail_run(&mut machine, err, now),
            },
            Err(ExecutionError::Cancelled { reason }) => {
                if let Err(err) = machine.stop(Some(&reason), now) {
                    self.log.error(
                        "run.stop_failed",
                        &[
                            ("runId", Value::String(run_id.clone())),
                            ("error", Value::String(err.to_string())),
                        ],
                    );
                }
                self.events.emit(&RunEvent::Stopped {
                    run_id: run_id.clone(),
                    reason: Some(reason.clone()),
                });
                (Some(reason), Some(FailurePoint::Cancelled))
            }
            Err(err) => self.fail_run(&mut machine, err, now),
        };

        let resource_usage = machine.resource_usage(now);
        machine.release_resources();
        self.unregister(session);
        let last_checkpoint_id = self
            .checkpoints
            .last_checkpoint(&run_id)
            .ok()
            .flatten()
            .map(|checkpoint| checkpoint.id);
        let outputs = machine.result().clone();
        let run = machine.into_run();

        RunOutcome {
            run_id,
            success: run.state == RunState::Completed,
            state: run.state,
            outputs,
            error,
            failure_point,
            resource_usage,
            last_checkpoint_id,
            run,
        }
    }

    fn pause_run(&self, machine: &mut RunStateMachine, now: i64) -> Result<(), ExecutionError> {
        machine.pause(now)?;
        machine.checkpoint(&self.checkpoints, self.settings.checkpoint_options, now)?;
        self.events.emit(&RunEvent::Paused {
            run_id: machine.run().id.clone(),
        });
        Ok(())
    }

    fn fail_run(
        &self,
        machine: &mut RunStateMachine,
        err: ExecutionError,
        now: i64,
    ) -> (Option<String>, Option<FailurePoint>) {
        let message = err.to_string();
        let failure_point = err.failure_point();
        if !machine.state().is_terminal() {
            if let Err(fail_err) = machine.fail(&message, now) {
                self.log.error(
                    "run.fail_failed",
                    &[
                        ("runId", Value::String(machine.run().id.clone())),
                        ("error", Value::String(fail_err.to_string())),
                    ],
                );
            }
        }
        self.log.error(
            "run.failed",
            &[
                ("runId", Value::String(machine.run().id.clone())),
                ("failurePoint", Value::String(failure_point.to_string())),
                ("error", Value::String(message.clone())),
            ],
        );
        self.events.emit(&RunEvent::Failed {
            run_id: machine.run().id.clone(),
            error: message.clone(),
            failure_point,
        });
        (Some(message), Some(failure_point))
    }

    fn reject_unstarted(&self, mut run: Run, err: ExecutionError) -> RunOutcome {
        let message = err.to_string();
        let failure_point = err.failure_point();
        run.state = RunState::Failed;
        self.events.emit(&RunEvent::Failed {
            run_id: run.id.clone(),
            error: message.clone(),
            failure_point,
        });
        RunOutcome {
            run_id: run.id.clone(),
            success: false,
            state: run.state,
            outputs: Map::new(),
            error: Some(message),
            failure_point: Some(failure_point),
            resource_usage: RunResourceUsage::default(),
            last_checkpoint_id: None,
            run,
        }
    }
}

/// Successors of `from` that may run now, in navigator order. Each one
/// behind a join records the arrival and is held back until its last
/// inbound path completes.
fn admit_successors(
    machine: &mut RunStateMachine,
    navigator: &dyn Navigator,
    from: &Location,
    next: Vec<Location>,
    visited: &BTreeSet<String>,
) -> Vec<Location> {
    next.into_iter()
        .filter(|successor| !visited.contains(successor.id()))
        .filter(|successor| {
            let required = navigator.required_arrivals(successor);
            machine.record_arrival(successor, from, required)
        })
        .collect()
}

fn retry_attempts(config: &Map<String, Value>) -> u32 {
    config
        .get("retry")
        .and_then(|retry| retry.get("maxAttempts").or_else(|| retry.get("max_attempts")))
        .and_then(Value::as_u64)
        .map(|attempts| attempts.clamp(1, MAX_STEP_ATTEMPTS) as u32)
        .unwrap_or(1)
}

/// Acting as the process tier: a `Process` request becomes a child run of
/// the requesting run.
impl TierDelegate for TierExecutor {
    fn execute(&self, request: &TierRequest) -> Result<TierResponse, DelegationError> {
        let TierInput::Process(input) = &request.input else {
            return Err(DelegationError::new(
                "process tier only accepts process input",
            ));
        };
        let Some(definition) = input.definition.clone() else {
            return Err(DelegationError::new(format!(
                "workflow `{}` has no definition",
                input.workflow_id
            )));
        };

        let run_request = RunRequest::new(&request.context.user_id, definition)
            .with_parent_run_id(&request.context.run_id)
            .with_inputs(input.parameters.clone())
            .with_budget(
                request
                    .allocation
                    .to_limits(self.settings.default_budget.tokens),
            );
        let outcome = TierExecutor::execute(self, run_request);
        let usage = ResourceUsage::new(
            outcome.resource_usage.credits,
            outcome.resource_usage.tokens,
            outcome.resource_usage.duration_ms,
            outcome.resource_usage.memory_mb,
        );
        if outcome.success {
            return Ok(TierResponse::succeeded(outcome.run_id, outcome.outputs, usage));
        }
        Ok(TierResponse::failed(
            outcome.run_id,
            outcome.error.unwrap_or_else(|| "run did not complete".to_string()),
            outcome.failure_point.unwrap_or(FailurePoint::Execution),
            usage,
        ))
    }
}
