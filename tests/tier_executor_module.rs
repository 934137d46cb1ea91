use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tierflow::admission::{
    sweep_once, ActiveTaskRegistry, ActiveTaskStore, AdmissionLimits, RunControlTable,
};
use tierflow::persistence::{MemoryRunStore, RunPersistence};
use tierflow::resources::{ResourceAmounts, ResourceUsage};
use tierflow::run::{BranchStatus, RunControl, RunState};
use tierflow::shared::EngineLog;
use tierflow::tier::{
    AllocationRequest, DelegationError, ExecutionSettings, FailurePoint, ProcessInput,
    RecordingEventSink, RequestContext, ResumeRequest, RunRequest, StepTypeGate, TierDelegate,
    TierExecutor, TierInput, TierRequest, TierResponse,
};
use tierflow::workflow::{StepType, WorkflowDefinition};

type Hook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
enum Behavior {
    Succeed { credits: u64, outputs: Value },
    FailTimes { times: u32, credits: u64 },
    Fail { credits: u64 },
}

#[derive(Debug, Clone)]
struct Call {
    step_id: String,
    parent_run_id: Option<String>,
    tool_name: Option<String>,
    max_credits: u64,
}

#[derive(Default)]
struct ScriptedDelegate {
    behaviors: HashMap<String, Behavior>,
    failures_seen: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<Call>>,
    after_call: Option<Hook>,
}

impl ScriptedDelegate {
    fn new() -> Self {
        Self::default()
    }

    fn step(mut self, step_id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(step_id.to_string(), behavior);
        self
    }

    fn after_call(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.after_call = Some(Box::new(hook));
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn called_steps(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.step_id).collect()
    }
}

impl TierDelegate for ScriptedDelegate {
    fn execute(&self, request: &TierRequest) -> Result<TierResponse, DelegationError> {
        let TierInput::Execution(input) = &request.input else {
            return Err(DelegationError::new("expected execution input"));
        };
        self.calls.lock().expect("calls lock").push(Call {
            step_id: input.step_id.clone(),
            parent_run_id: request.context.parent_run_id.clone(),
            tool_name: input.tool_name.clone(),
            max_credits: request.allocation.max_credits,
        });

        let behavior = self
            .behaviors
            .get(&input.step_id)
            .cloned()
            .unwrap_or(Behavior::Succeed {
                credits: 1,
                outputs: json!({}),
            });
        let run_id = request.context.run_id.clone();
        let result = match behavior {
            Behavior::Succeed { credits, outputs } => Ok(TierResponse::succeeded(
                run_id,
                outputs.as_object().cloned().unwrap_or_default(),
                ResourceUsage::new(credits, 10, 5, 1),
            )),
            Behavior::FailTimes { times, credits } => {
                let mut seen = self.failures_seen.lock().expect("failures lock");
                let count = seen.entry(input.step_id.clone()).or_insert(0);
                if *count < times {
                    *count += 1;
                    Err(DelegationError::new("transient failure")
                        .with_usage(ResourceUsage::new(credits, 0, 5, 0)))
                } else {
                    Ok(TierResponse::succeeded(
                        run_id,
                        Map::new(),
                        ResourceUsage::new(credits, 0, 5, 0),
                    ))
                }
            }
            Behavior::Fail { credits } => Ok(TierResponse::failed(
                run_id,
                "tool crashed",
                FailurePoint::Execution,
                ResourceUsage::new(credits, 0, 5, 0),
            )),
        };
        if let Some(hook) = &self.after_call {
            hook(&input.step_id);
        }
        result
    }
}

fn sequential(steps: Value) -> WorkflowDefinition {
    serde_json::from_value(json!({"type": "sequential", "id": "wf-seq", "steps": steps}))
        .expect("parse workflow")
}

fn abc_workflow() -> WorkflowDefinition {
    sequential(json!([
        {"id": "a", "type": "tool_call", "config": {"toolName": "search"}},
        {"id": "b", "type": "llm_call"},
        {"id": "c", "type": "api_call"}
    ]))
}

fn thirty_each() -> ScriptedDelegate {
    ScriptedDelegate::new()
        .step("a", Behavior::Succeed { credits: 30, outputs: json!({"hits": 3}) })
        .step("b", Behavior::Succeed { credits: 30, outputs: json!({"summary": "ok"}) })
        .step("c", Behavior::Succeed { credits: 30, outputs: json!({}) })
}

fn executor(delegate: Arc<ScriptedDelegate>, store: Arc<dyn RunPersistence>) -> TierExecutor {
    TierExecutor::new(delegate, store, EngineLog::disabled())
}

#[test]
fn executor_module_three_steps_within_budget_complete() {
    let delegate = Arc::new(thirty_each());
    let events = Arc::new(RecordingEventSink::new());
    let store: Arc<dyn RunPersistence> = Arc::new(MemoryRunStore::new());
    let executor = executor(delegate.clone(), store.clone()).with_event_sink(events.clone());

    let outcome = executor.execute(
        RunRequest::new("user-1", abc_workflow())
            .with_run_id("run-abc")
            .with_budget(ResourceAmounts::credits(100)),
    );

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(outcome.resource_usage.credits, 90);
    assert_eq!(outcome.resource_usage.steps_executed, 3);
    assert_eq!(outcome.run.progress.completed_steps, 3);
    assert_eq!(outcome.outputs["a"], json!({"hits": 3}));
    assert_eq!(outcome.run.context.variables["summary"], json!("ok"));
    assert_eq!(delegate.called_steps(), vec!["a", "b", "c"]);
    assert_eq!(
        delegate.calls().iter().map(|call| call.max_credits).collect::<Vec<_>>(),
        vec![100, 70, 40]
    );
    assert_eq!(delegate.calls()[0].tool_name.as_deref(), Some("search"));
    assert_eq!(
        events.names(),
        vec![
            "started",
            "step_started",
            "step_completed",
            "step_started",
            "step_completed",
            "step_started",
            "step_completed",
            "completed"
        ]
    );

    let persisted = store
        .load_run_state("run-abc")
        .expect("load state")
        .expect("state record");
    assert_eq!(persisted.state, RunState::Completed);
    assert!(outcome.last_checkpoint_id.is_some());
}

#[test]
fn executor_module_step_failure_keeps_partial_usage() {
    let delegate = Arc::new(
        thirty_each().step("b", Behavior::Fail { credits: 7 }),
    );
    let events = Arc::new(RecordingEventSink::new());
    let executor = executor(delegate.clone(), Arc::new(MemoryRunStore::new()))
        .with_event_sink(events.clone());

    let outcome = executor.execute(
        RunRequest::new("user-1", abc_workflow()).with_budget(ResourceAmounts::credits(100)),
    );

    assert!(!outcome.success);
    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.failure_point, Some(FailurePoint::Execution));
    assert_eq!(outcome.failure_point.map(|p| p.as_str()), Some("execution"));
    assert!(outcome.error.as_deref().unwrap_or_default().contains("`b`"));
    assert_eq!(outcome.resource_usage.credits, 37);
    assert_eq!(outcome.run.progress.failed_steps, 1);
    assert_eq!(delegate.called_steps(), vec!["a", "b"]);
    assert_eq!(events.names().last().copied(), Some("failed"));
}

#[test]
fn executor_module_exhausted_budget_fails_at_allocation() {
    let delegate = Arc::new(thirty_each());
    let executor = executor(delegate.clone(), Arc::new(MemoryRunStore::new()));

    let outcome = executor.execute(
        RunRequest::new("user-1", abc_workflow()).with_budget(ResourceAmounts::credits(50)),
    );

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.failure_point, Some(FailurePoint::Allocation));
    assert_eq!(outcome.resource_usage.credits, 60);
    assert_eq!(delegate.called_steps(), vec!["a", "b"]);
}

#[test]
fn executor_module_security_gate_denial_skips_delegation() {
    let delegate = Arc::new(thirty_each());
    let executor = executor(delegate.clone(), Arc::new(MemoryRunStore::new()))
        .with_security_gate(Arc::new(StepTypeGate::new().deny_tool("search")));

    let outcome = executor.execute(RunRequest::new("user-1", abc_workflow()));

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.failure_point, Some(FailurePoint::Permission));
    assert!(delegate.called_steps().is_empty());
    assert_eq!(outcome.resource_usage.credits, 0);
}

#[test]
fn executor_module_step_type_allow_list_blocks_other_types() {
    let delegate = Arc::new(thirty_each());
    let executor = executor(delegate.clone(), Arc::new(MemoryRunStore::new())).with_security_gate(
        Arc::new(StepTypeGate::new().allow_types([StepType::ToolCall, StepType::LlmCall])),
    );

    let outcome = executor.execute(RunRequest::new("user-1", abc_workflow()));

    assert_eq!(outcome.failure_point, Some(FailurePoint::Permission));
    assert!(outcome
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("api_call"));
    assert_eq!(delegate.called_steps(), vec!["a", "b"]);
    assert_eq!(outcome.run.progress.completed_steps, 2);
    assert_eq!(outcome.run.progress.failed_steps, 1);
}

#[test]
fn executor_module_retries_until_attempts_run_out() {
    let workflow = sequential(json!([
        {"id": "flaky", "type": "api_call", "config": {"retry": {"maxAttempts": 3}}},
        {"id": "stubborn", "type": "api_call", "config": {"retry": {"max_attempts": 2}}}
    ]));
    let delegate = Arc::new(
        ScriptedDelegate::new()
            .step("flaky", Behavior::FailTimes { times: 2, credits: 2 })
            .step("stubborn", Behavior::FailTimes { times: 5, credits: 1 }),
    );
    let executor = executor(delegate.clone(), Arc::new(MemoryRunStore::new()));

    let outcome = executor.execute(RunRequest::new("user-1", workflow));

    assert_eq!(
        delegate.called_steps(),
        vec!["flaky", "flaky", "flaky", "stubborn", "stubborn"]
    );
    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.resource_usage.steps_executed, 5);
    assert_eq!(outcome.resource_usage.credits, 8);
    assert!(outcome
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("after 2 attempt(s)"));
}

#[test]
fn executor_module_skip_condition_bypasses_step() {
    let workflow = sequential(json!([
        {"id": "a", "type": "tool_call"},
        {"id": "b", "type": "llm_call", "skipCondition": {"op": "truthy", "path": "fastPath"}},
        {"id": "c", "type": "api_call"}
    ]));
    let delegate = Arc::new(thirty_each());
    let executor = executor(delegate.clone(), Arc::new(MemoryRunStore::new()));
    let inputs = json!({"fastPath": true}).as_object().cloned().unwrap_or_default();

    let outcome = executor.execute(RunRequest::new("user-1", workflow).with_inputs(inputs));

    assert!(outcome.success);
    assert_eq!(delegate.called_steps(), vec!["a", "c"]);
    assert_eq!(outcome.run.progress.skipped_steps, 1);
    assert_eq!(outcome.resource_usage.credits, 60);
}

#[test]
fn executor_module_graph_routes_on_step_outputs() {
    let workflow: WorkflowDefinition = serde_json::from_value(json!({
        "type": "graph",
        "id": "wf-review",
        "nodes": [
            {"id": "draft", "step": {"id": "draft", "type": "llm_call"}},
            {"id": "approve", "step": {"id": "approve", "type": "api_call"}},
            {"id": "revise", "step": {"id": "revise", "type": "llm_call"}}
        ],
        "edges": [
            {"from": "draft", "to": "approve",
             "condition": {"op": "equals", "path": "blackboard.draft.verdict", "value": "ok"}},
            {"from": "draft", "to": "revise",
             "condition": {"op": "not_equals", "path": "blackboard.draft.verdict", "value": "ok"}}
        ]
    }))
    .expect("parse graph");
    let delegate = Arc::new(ScriptedDelegate::new().step(
        "draft",
        Behavior::Succeed {
            credits: 5,
            outputs: json!({"verdict": "ok"}),
        },
    ));
    let executor = executor(delegate.clone(), Arc::new(MemoryRunStore::new()));

    let outcome = executor.execute(RunRequest::new("user-1", workflow));

    assert!(outcome.success);
    assert_eq!(delegate.called_steps(), vec!["draft", "approve"]);
    assert_eq!(outcome.run.progress.skipped_steps, 1);
}

fn review_process() -> WorkflowDefinition {
    serde_json::from_value(json!({
        "type": "process",
        "id": "wf-contract",
        "elements": [
            {"kind": "start_event", "id": "start"},
            {"kind": "parallel_gateway", "id": "fork"},
            {"kind": "task", "id": "legal", "step": {"id": "legal", "type": "llm_call"}},
            {"kind": "task", "id": "finance", "step": {"id": "finance", "type": "api_call"}},
            {"kind": "parallel_gateway", "id": "join"},
            {"kind": "task", "id": "sign", "step": {"id": "sign", "type": "tool_call"}},
            {"kind": "end_event", "id": "end"}
        ],
        "flows": [
            {"id": "f1", "source": "start", "target": "fork"},
            {"id": "f2", "source": "fork", "target": "legal"},
            {"id": "f3", "source": "fork", "target": "finance"},
            {"id": "f4", "source": "legal", "target": "join"},
            {"id": "f5", "source": "finance", "target": "join"},
            {"id": "f6", "source": "join", "target": "sign"},
            {"id": "f7", "source": "sign", "target": "end"}
        ]
    }))
    .expect("parse process")
}

#[test]
fn executor_module_process_join_waits_for_every_forked_task() {
    let delegate = Arc::new(ScriptedDelegate::new());
    let executor = executor(delegate.clone(), Arc::new(MemoryRunStore::new()));

    let outcome = executor.execute(RunRequest::new("user-1", review_process()));

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(delegate.called_steps(), vec!["legal", "finance", "sign"]);
    assert_eq!(outcome.run.progress.completed_steps, 3);
    assert_eq!(outcome.run.progress.skipped_steps, 0);
    assert!(outcome.run.progress.joins.is_empty());
}

#[test]
fn executor_module_join_arrivals_survive_pause_and_resume() {
    let store: Arc<dyn RunPersistence> = Arc::new(MemoryRunStore::new());
    let control = RunControl::new();
    let pause_handle = control.clone();
    let delegate = Arc::new(ScriptedDelegate::new().after_call(move |step_id| {
        if step_id == "legal" {
            pause_handle.request_pause();
        }
    }));
    let first = executor(delegate.clone(), store.clone());

    let paused = first.execute(
        RunRequest::new("user-1", review_process())
            .with_run_id("run-join")
            .with_control(control),
    );
    assert_eq!(paused.state, RunState::Paused);
    assert_eq!(delegate.called_steps(), vec!["legal"]);
    let joins = &paused.run.progress.joins;
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].location.id(), "sign");
    assert_eq!(joins[0].arrived_from, vec!["legal".to_string()]);
    assert_eq!(joins[0].required, 2);

    let resumed_delegate = Arc::new(ScriptedDelegate::new());
    let second = executor(resumed_delegate.clone(), store);
    let resumed = second.resume(ResumeRequest::new("run-join", "user-1", review_process()));

    assert!(resumed.success, "error: {:?}", resumed.error);
    assert_eq!(resumed_delegate.called_steps(), vec!["finance", "sign"]);
    assert_eq!(resumed.resource_usage.steps_executed, 3);
}

#[test]
fn executor_module_graph_fan_in_runs_after_all_predecessors() {
    let workflow: WorkflowDefinition = serde_json::from_value(json!({
        "type": "graph",
        "id": "wf-diamond",
        "nodes": [
            {"id": "fetch", "step": {"id": "fetch", "type": "api_call"}},
            {"id": "score", "step": {"id": "score", "type": "llm_call"}},
            {"id": "label", "step": {"id": "label", "type": "llm_call"}},
            {"id": "store", "step": {"id": "store", "type": "tool_call"}}
        ],
        "edges": [
            {"from": "fetch", "to": "score"},
            {"from": "fetch", "to": "label"},
            {"from": "score", "to": "store"},
            {"from": "label", "to": "store"}
        ]
    }))
    .expect("parse graph");
    let delegate = Arc::new(ScriptedDelegate::new());
    let executor = executor(delegate.clone(), Arc::new(MemoryRunStore::new()));

    let outcome = executor.execute(RunRequest::new("user-1", workflow));

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(delegate.called_steps(), vec!["fetch", "score", "label", "store"]);
}

#[test]
fn executor_module_graph_runs_every_root_and_releases_untaken_joins() {
    let workflow: WorkflowDefinition = serde_json::from_value(json!({
        "type": "graph",
        "id": "wf-roots",
        "nodes": [
            {"id": "orders", "step": {"id": "orders", "type": "api_call"}},
            {"id": "refunds", "step": {"id": "refunds", "type": "api_call"}},
            {"id": "audit", "step": {"id": "audit", "type": "llm_call"}},
            {"id": "report", "step": {"id": "report", "type": "tool_call"}}
        ],
        "edges": [
            {"from": "orders", "to": "report"},
            {"from": "refunds", "to": "audit",
             "condition": {"op": "truthy", "path": "blackboard.refunds.flagged"}},
            {"from": "refunds", "to": "report"},
            {"from": "audit", "to": "report"}
        ]
    }))
    .expect("parse graph");
    let delegate = Arc::new(ScriptedDelegate::new());
    let executor = executor(delegate.clone(), Arc::new(MemoryRunStore::new()));

    let outcome = executor.execute(RunRequest::new("user-1", workflow));

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(delegate.called_steps(), vec!["orders", "refunds", "report"]);
    assert_eq!(outcome.run.progress.skipped_steps, 1);
    assert!(outcome.run.progress.joins.is_empty());
}

#[test]
fn executor_module_parallel_branches_run_in_declared_order() {
    let workflow: WorkflowDefinition = serde_json::from_value(json!({
        "type": "sequential",
        "id": "wf-fanout",
        "executionMode": "parallel",
        "steps": [
            {"id": "a", "type": "tool_call"},
            {"id": "b", "type": "tool_call"},
            {"id": "c", "type": "api_call"}
        ],
        "branches": [
            {"id": "left", "steps": ["a", "b"]},
            {"id": "right", "steps": ["c"]}
        ]
    }))
    .expect("parse parallel");
    let delegate = Arc::new(thirty_each());
    let executor = executor(delegate.clone(), Arc::new(MemoryRunStore::new()));

    let outcome = executor.execute(RunRequest::new("user-1", workflow));

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(delegate.called_steps(), vec!["a", "b", "c"]);
    let branches = &outcome.run.progress.branches;
    assert_eq!(branches.len(), 2);
    assert!(branches
        .iter()
        .all(|branch| branch.status == BranchStatus::Completed));
    assert_eq!(branches[0].locations.len(), 2);
}

#[test]
fn executor_module_pause_checkpoints_and_resume_finishes() {
    let store: Arc<dyn RunPersistence> = Arc::new(MemoryRunStore::new());
    let control = RunControl::new();
    let pause_handle = control.clone();
    let delegate = Arc::new(thirty_each().after_call(move |step_id| {
        if step_id == "a" {
            pause_handle.request_pause();
        }
    }));
    let first = executor(delegate.clone(), store.clone());

    let paused = first.execute(
        RunRequest::new("user-1", abc_workflow())
            .with_run_id("run-pause")
            .with_budget(ResourceAmounts::credits(100))
            .with_control(control),
    );
    assert_eq!(paused.state, RunState::Paused);
    assert!(!paused.success);
    assert!(paused.error.is_none());
    assert!(paused.last_checkpoint_id.is_some());
    assert_eq!(delegate.called_steps(), vec!["a"]);

    let resumed_delegate = Arc::new(thirty_each());
    let events = Arc::new(RecordingEventSink::new());
    let second = executor(resumed_delegate.clone(), store.clone()).with_event_sink(events.clone());
    let resumed = second.resume(
        ResumeRequest::new("run-pause", "user-1", abc_workflow())
            .with_budget(ResourceAmounts::credits(100)),
    );

    assert!(resumed.success, "error: {:?}", resumed.error);
    assert_eq!(resumed_delegate.called_steps(), vec!["b", "c"]);
    assert_eq!(resumed.resource_usage.credits, 90);
    assert_eq!(resumed.resource_usage.steps_executed, 3);
    assert_eq!(resumed.run.context.variables["hits"], json!(3));
    assert_eq!(events.names().first().copied(), Some("started"));
}

#[test]
fn executor_module_resume_from_explicit_checkpoint() {
    let store: Arc<dyn RunPersistence> = Arc::new(MemoryRunStore::new());
    let control = RunControl::new();
    let pause_handle = control.clone();
    let delegate = Arc::new(thirty_each().after_call(move |step_id| {
        if step_id == "b" {
            pause_handle.request_pause();
        }
    }));
    let first = executor(delegate, store.clone());
    let paused = first.execute(
        RunRequest::new("user-1", abc_workflow())
            .with_run_id("run-explicit")
            .with_control(control),
    );
    assert_eq!(paused.state, RunState::Paused);

    let checkpoint = first
        .checkpoints()
        .last_checkpoint("run-explicit")
        .expect("load checkpoint")
        .expect("checkpoint exists");
    assert_eq!(checkpoint.run_id, "run-explicit");

    let resumed_delegate = Arc::new(thirty_each());
    let second = executor(resumed_delegate.clone(), store);
    let resumed = second.resume(
        ResumeRequest::new("run-explicit", "user-1", abc_workflow()).with_checkpoint(checkpoint),
    );

    assert!(resumed.success, "error: {:?}", resumed.error);
    assert_eq!(resumed_delegate.called_steps(), vec!["c"]);
    assert_eq!(resumed.resource_usage.credits, 90);
}

#[test]
fn executor_module_resume_without_checkpoint_fails_initialization() {
    let executor = executor(Arc::new(thirty_each()), Arc::new(MemoryRunStore::new()));
    let outcome = executor.resume(ResumeRequest::new("never-ran", "user-1", abc_workflow()));
    assert_eq!(outcome.failure_point, Some(FailurePoint::Initialization));
    assert!(outcome
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("no checkpoint"));
}

#[test]
fn executor_module_admission_eviction_stops_run() {
    let registry = ActiveTaskRegistry::shared();
    let controls = RunControlTable::new();
    let sweep_registry = registry.clone();
    let sweep_controls = controls.clone();
    let delegate = Arc::new(thirty_each().after_call(move |step_id| {
        if step_id == "a" {
            sweep_once(
                &sweep_registry,
                &AdmissionLimits {
                    max_active: 0,
                    task_timeout_ms: i64::MAX,
                },
                "test",
                Some(&sweep_controls),
                &EngineLog::disabled(),
                i64::MAX,
            );
        }
    }));
    let events = Arc::new(RecordingEventSink::new());
    let executor = executor(delegate.clone(), Arc::new(MemoryRunStore::new()))
        .with_admission(registry.clone())
        .with_control_table(controls)
        .with_event_sink(events.clone());

    let outcome = executor.execute(
        RunRequest::new("user-1", abc_workflow())
            .with_run_id("run-evicted")
            .with_budget(ResourceAmounts::credits(100)),
    );

    assert_eq!(outcome.state, RunState::Stopped);
    assert_eq!(outcome.failure_point, Some(FailurePoint::Cancelled));
    assert_eq!(outcome.error.as_deref(), Some("admission load shedding"));
    assert_eq!(delegate.called_steps(), vec!["a"]);
    assert_eq!(outcome.resource_usage.credits, 30);
    assert_eq!(events.names().last().copied(), Some("stopped"));
    assert!(!registry.lock().expect("registry lock").contains("run-evicted"));
}

#[test]
fn executor_module_registers_premium_runs_while_active() {
    let registry = ActiveTaskRegistry::shared();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let hook_registry = registry.clone();
    let hook_seen = seen.clone();
    let delegate = Arc::new(thirty_each().after_call(move |_| {
        let premium = hook_registry
            .lock()
            .expect("registry lock")
            .get("run-premium")
            .map(|record| record.has_premium);
        hook_seen.lock().expect("seen lock").push(premium);
    }));
    let executor =
        executor(delegate, Arc::new(MemoryRunStore::new())).with_admission(registry.clone());

    let outcome = executor.execute(
        RunRequest::new("user-1", abc_workflow())
            .with_run_id("run-premium")
            .with_premium(true),
    );

    assert!(outcome.success);
    assert_eq!(
        seen.lock().expect("seen lock").clone(),
        vec![Some(true), Some(true), Some(true)]
    );
    assert!(registry.lock().expect("registry lock").is_empty());
}

#[test]
fn executor_module_stop_request_before_first_step() {
    let control = RunControl::new();
    control.request_stop("operator cancelled");
    let delegate = Arc::new(thirty_each());
    let executor = executor(delegate.clone(), Arc::new(MemoryRunStore::new()));

    let outcome =
        executor.execute(RunRequest::new("user-1", abc_workflow()).with_control(control));

    assert_eq!(outcome.state, RunState::Stopped);
    assert_eq!(outcome.error.as_deref(), Some("operator cancelled"));
    assert!(delegate.called_steps().is_empty());
}

#[test]
fn executor_module_max_steps_guard_fails_navigation() {
    let delegate = Arc::new(thirty_each());
    let executor = executor(delegate.clone(), Arc::new(MemoryRunStore::new())).with_settings(
        ExecutionSettings {
            max_steps: 2,
            ..ExecutionSettings::default()
        },
    );

    let outcome = executor.execute(RunRequest::new("user-1", abc_workflow()));

    assert_eq!(outcome.failure_point, Some(FailurePoint::Navigation));
    assert_eq!(delegate.called_steps(), vec!["a", "b"]);
}

#[test]
fn executor_module_step_budget_caps_each_reservation() {
    let delegate = Arc::new(thirty_each());
    let executor = executor(delegate.clone(), Arc::new(MemoryRunStore::new())).with_settings(
        ExecutionSettings {
            step_budget: Some(ResourceAmounts::credits(35)),
            ..ExecutionSettings::default()
        },
    );

    let outcome = executor.execute(
        RunRequest::new("user-1", abc_workflow()).with_budget(ResourceAmounts::credits(100)),
    );

    assert!(outcome.success);
    assert_eq!(
        delegate.calls().iter().map(|call| call.max_credits).collect::<Vec<_>>(),
        vec![35, 35, 35]
    );
}

#[test]
fn executor_module_serves_process_tier_requests_as_child_runs() {
    let delegate = Arc::new(thirty_each());
    let process_tier = executor(delegate.clone(), Arc::new(MemoryRunStore::new()));
    let request = TierRequest {
        context: RequestContext {
            run_id: "coordination-run".to_string(),
            user_id: "user-1".to_string(),
            parent_run_id: None,
            timestamp: None,
        },
        input: TierInput::Process(ProcessInput {
            workflow_id: "wf-seq".to_string(),
            parameters: Map::new(),
            definition: Some(abc_workflow()),
        }),
        allocation: AllocationRequest {
            max_credits: 100,
            max_duration_ms: 60_000,
            max_memory_mb: 512,
        },
        options: Map::new(),
    };

    let response = TierDelegate::execute(&process_tier, &request).expect("process tier response");

    assert!(response.success);
    assert_eq!(response.metadata.resource_usage.credits, 90);
    assert!(delegate
        .calls()
        .iter()
        .all(|call| call.parent_run_id.as_deref() == Some("coordination-run")));

    let mut missing = request.clone();
    missing.input = TierInput::Process(ProcessInput {
        workflow_id: "wf-unknown".to_string(),
        parameters: Map::new(),
        definition: None,
    });
    let err = TierDelegate::execute(&process_tier, &missing).expect_err("no definition");
    assert!(err.message.contains("wf-unknown"));
}
