use serde_json::json;
use tierflow::run::RunContext;
use tierflow::workflow::{navigator_for, Location, NavigationError, WorkflowDefinition};

fn definition(value: serde_json::Value) -> WorkflowDefinition {
    serde_json::from_value(value).expect("parse workflow definition")
}

fn context(variables: serde_json::Value) -> RunContext {
    let serde_json::Value::Object(map) = variables else {
        panic!("variables must be an object");
    };
    RunContext::with_variables(map)
}

fn walk(def: &WorkflowDefinition, ctx: &RunContext) -> Vec<String> {
    let navigator = navigator_for(def).expect("navigator");
    let mut visited = Vec::new();
    let mut frontier = vec![navigator.start_location().expect("start")];
    while let Some(location) = frontier.pop() {
        visited.push(navigator.step_info(&location).expect("step info").id);
        let next = navigator.next_locations(&location, ctx).expect("next");
        frontier.extend(next.into_iter().rev());
    }
    visited
}

fn three_steps_skipping_second() -> WorkflowDefinition {
    definition(json!({
        "type": "sequential",
        "id": "triage",
        "steps": [
            {"id": "classify", "type": "llm_call"},
            {"id": "enrich", "type": "tool_call",
             "skipCondition": {"op": "truthy", "path": "skipEnrich"}},
            {"id": "notify", "type": "api_call"}
        ]
    }))
}

#[test]
fn navigator_module_sequential_skips_flagged_step() {
    let def = three_steps_skipping_second();
    let navigator = navigator_for(&def).expect("navigator");
    let ctx = context(json!({"skipEnrich": true}));

    let start = navigator.start_location().expect("start");
    assert_eq!(start, Location::at_index(0));
    let next = navigator.next_locations(&start, &ctx).expect("next");
    assert_eq!(next, vec![Location::at_index(2)]);
    assert!(navigator.is_end_location(&Location::at_index(2), &ctx));
    assert_eq!(walk(&def, &ctx), vec!["classify", "notify"]);
    assert_eq!(walk(&def, &RunContext::default()), vec!["classify", "enrich", "notify"]);
}

#[test]
fn navigator_module_answers_are_deterministic_for_same_context() {
    let def = three_steps_skipping_second();
    let navigator = navigator_for(&def).expect("navigator");
    let ctx = context(json!({"skipEnrich": false}));
    let start = navigator.start_location().expect("start");

    let first = navigator.next_locations(&start, &ctx).expect("first");
    for _ in 0..5 {
        assert_eq!(navigator.next_locations(&start, &ctx).expect("again"), first);
    }
    assert_eq!(navigator.total_steps(), 3);
}

#[test]
fn navigator_module_rejects_empty_and_unknown_locations() {
    let empty = definition(json!({"type": "sequential", "id": "empty", "steps": []}));
    match navigator_for(&empty) {
        Err(NavigationError::CannotNavigate { workflow_id, .. }) => assert_eq!(workflow_id, "empty"),
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("empty workflow must not be navigable"),
    }

    let def = three_steps_skipping_second();
    let navigator = navigator_for(&def).expect("navigator");
    let err = navigator
        .step_info(&Location::at_index(9))
        .expect_err("out of range");
    assert!(matches!(err, NavigationError::UnknownLocation { .. }));
}

#[test]
fn navigator_module_graph_follows_conditional_edges() {
    let def = definition(json!({
        "type": "graph",
        "id": "review",
        "nodes": [
            {"id": "draft", "step": {"id": "draft", "type": "llm_call"}},
            {"id": "approve", "step": {"id": "approve", "type": "api_call"}},
            {"id": "revise", "step": {"id": "revise", "type": "llm_call"}}
        ],
        "edges": [
            {"from": "draft", "to": "approve",
             "condition": {"op": "equals", "path": "verdict", "value": "ok"}},
            {"from": "draft", "to": "revise",
             "condition": {"op": "not_equals", "path": "verdict", "value": "ok"}}
        ]
    }));
    let navigator = navigator_for(&def).expect("navigator");
    assert_eq!(navigator.kind(), "graph");
    assert_eq!(navigator.start_location().expect("start"), Location::at_node("draft"));

    assert_eq!(walk(&def, &context(json!({"verdict": "ok"}))), vec!["draft", "approve"]);
    assert_eq!(walk(&def, &context(json!({"verdict": "no"}))), vec!["draft", "revise"]);
}

#[test]
fn navigator_module_process_resolves_exclusive_gateway_default() {
    let def = definition(json!({
        "type": "process",
        "id": "refund",
        "elements": [
            {"kind": "start_event", "id": "start"},
            {"kind": "task", "id": "assess", "step": {"id": "assess", "type": "llm_call"}},
            {"kind": "exclusive_gateway", "id": "route", "defaultFlow": "to_manual"},
            {"kind": "task", "id": "auto", "step": {"id": "auto", "type": "api_call"}},
            {"kind": "task", "id": "manual", "step": {"id": "manual", "type": "tool_call"}},
            {"kind": "end_event", "id": "end"}
        ],
        "flows": [
            {"id": "f1", "source": "start", "target": "assess"},
            {"id": "f2", "source": "assess", "target": "route"},
            {"id": "to_auto", "source": "route", "target": "auto",
             "condition": {"op": "less_than", "path": "amount", "value": 100.0}},
            {"id": "to_manual", "source": "route", "target": "manual"},
            {"id": "f5", "source": "auto", "target": "end"},
            {"id": "f6", "source": "manual", "target": "end"}
        ]
    }));
    let navigator = navigator_for(&def).expect("navigator");
    assert_eq!(navigator.total_steps(), 3);
    assert_eq!(walk(&def, &context(json!({"amount": 40}))), vec!["assess", "auto"]);
    assert_eq!(walk(&def, &context(json!({"amount": 400}))), vec!["assess", "manual"]);
}

#[test]
fn navigator_module_parallel_mode_exposes_branches() {
    let def = definition(json!({
        "type": "sequential",
        "id": "fanout",
        "executionMode": "parallel",
        "steps": [
            {"id": "a1", "type": "tool_call"},
            {"id": "a2", "type": "tool_call"},
            {"id": "b1", "type": "api_call"}
        ],
        "branches": [
            {"id": "left", "steps": ["a1", "a2"]},
            {"id": "right", "steps": ["b1"]}
        ]
    }));
    let navigator = navigator_for(&def).expect("navigator");
    let branches = navigator.parallel_branches();
    assert_eq!(branches.len(), 2);
    assert_eq!(branches[0].start, Location::in_branch(0, "left"));

    let ctx = RunContext::default();
    let next = navigator
        .next_locations(&branches[0].start, &ctx)
        .expect("next in branch");
    assert_eq!(next, vec![Location::in_branch(1, "left")]);
    assert_eq!(navigator.step_info(&next[0]).expect("info").id, "a2");
    assert!(navigator.is_end_location(&branches[1].start, &ctx));
    assert_eq!(navigator.total_steps(), 3);
}

fn review_fork_join() -> WorkflowDefinition {
    definition(json!({
        "type": "process",
        "id": "review",
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
}

#[test]
fn navigator_module_process_start_fans_out_through_parallel_gateway() {
    let def = review_fork_join();
    let navigator = navigator_for(&def).expect("navigator");

    assert_eq!(
        navigator.start_locations().expect("start locations"),
        vec![Location::at_node("legal"), Location::at_node("finance")]
    );
    assert_eq!(navigator.start_location().expect("start"), Location::at_node("legal"));
    assert_eq!(navigator.required_arrivals(&Location::at_node("legal")), 1);
    assert_eq!(navigator.required_arrivals(&Location::at_node("sign")), 2);

    let ctx = RunContext::default();
    assert_eq!(
        navigator
            .next_locations(&Location::at_node("finance"), &ctx)
            .expect("next"),
        vec![Location::at_node("sign")]
    );
}

#[test]
fn navigator_module_graph_starts_at_every_root_and_counts_fan_in() {
    let def = definition(json!({
        "type": "graph",
        "id": "report",
        "nodes": [
            {"id": "sales", "step": {"id": "sales", "type": "api_call"}},
            {"id": "support", "step": {"id": "support", "type": "api_call"}},
            {"id": "merge", "step": {"id": "merge", "type": "llm_call"}},
            {"id": "publish", "step": {"id": "publish", "type": "tool_call"}}
        ],
        "edges": [
            {"from": "sales", "to": "merge"},
            {"from": "support", "to": "merge"},
            {"from": "merge", "to": "publish"},
            {"from": "publish", "to": "merge",
             "condition": {"op": "equals", "path": "retry", "value": true}}
        ]
    }));
    let navigator = navigator_for(&def).expect("navigator");

    assert_eq!(
        navigator.start_locations().expect("start locations"),
        vec![Location::at_node("sales"), Location::at_node("support")]
    );
    assert_eq!(navigator.start_location().expect("start"), Location::at_node("sales"));
    assert_eq!(navigator.required_arrivals(&Location::at_node("merge")), 2);
    assert_eq!(navigator.required_arrivals(&Location::at_node("publish")), 1);
    assert_eq!(navigator.required_arrivals(&Location::at_node("sales")), 1);
}

#[test]
fn navigator_module_graph_explicit_start_wins_over_roots() {
    let def = definition(json!({
        "type": "graph",
        "id": "pinned",
        "start": "second",
        "nodes": [
            {"id": "first", "step": {"id": "first", "type": "api_call"}},
            {"id": "second", "step": {"id": "second", "type": "api_call"}}
        ],
        "edges": []
    }));
    let navigator = navigator_for(&def).expect("navigator");
    assert_eq!(
        navigator.start_locations().expect("start locations"),
        vec![Location::at_node("second")]
    );
}
