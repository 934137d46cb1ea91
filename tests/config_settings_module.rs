use serde_json::json;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;
use tierflow::checkpoint::CheckpointManager;
use tierflow::config::{load_settings, save_settings, ConfigError, EngineSettings};
use tierflow::persistence::{FileRunStore, RunPersistence};
use tierflow::resources::ResourceUsage;
use tierflow::run::RunState;
use tierflow::shared::logging::{engine_log_path, read_log_lines};
use tierflow::tier::{
    DelegationError, RunRequest, TierDelegate, TierExecutor, TierRequest, TierResponse,
};
use tierflow::workflow::WorkflowDefinition;

struct FixedCost;

impl TierDelegate for FixedCost {
    fn execute(&self, request: &TierRequest) -> Result<TierResponse, DelegationError> {
        Ok(TierResponse::succeeded(
            request.context.run_id.clone(),
            serde_json::Map::new(),
            ResourceUsage::new(4, 0, 1, 0),
        ))
    }
}

#[test]
fn config_module_load_settings_reads_yaml_file() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("engine.yaml");
    fs::write(
        &path,
        format!(
            r#"
state_root: {}
checkpoints:
  max_per_run: 2
  ttl_seconds: 60
  compress: true
admission:
  max_active: 3
  sweep_interval_ms: 500
default_budget:
  max_credits: 40
  max_tokens: 1000
max_steps: 12
"#,
            temp.path().join("state").display()
        ),
    )
    .expect("write settings");

    let settings = load_settings(&path).expect("load settings");

    assert_eq!(settings.checkpoints.max_per_run, 2);
    assert!(settings.checkpoints.compress);
    assert_eq!(settings.admission_limits().max_active, 3);
    assert_eq!(settings.admission_limits().task_timeout_ms, 30 * 60 * 1000);
    assert_eq!(settings.sweep_interval().as_millis(), 500);
    assert_eq!(settings.checkpoint_policy().ttl_ms, 60_000);

    let execution = settings.execution_settings();
    assert_eq!(execution.default_budget.credits, 40);
    assert_eq!(execution.default_budget.tokens, 1000);
    assert!(execution.checkpoint_options.compress);
    assert_eq!(execution.max_steps, 12);
    assert!(execution.step_budget.is_none());
}

#[test]
fn config_module_rejects_invalid_values() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("engine.yaml");
    fs::write(&path, "admission:\n  max_active: 0\n").expect("write settings");

    let err = load_settings(&path).expect_err("zero max_active");
    assert!(matches!(err, ConfigError::Validation(_)));
    assert!(err.to_string().contains("admission.max_active"));

    let missing = temp.path().join("absent.yaml");
    let err = load_settings(&missing).expect_err("missing file");
    assert!(matches!(err, ConfigError::Read { .. }));
    let message = err.to_string();
    assert!(message.starts_with("cannot read engine settings at "), "{message}");
    assert!(message.contains("absent.yaml"), "{message}");

    fs::write(&path, "admission: [unclosed\n").expect("write broken settings");
    let err = load_settings(&path).expect_err("broken yaml");
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("engine settings at"), "{err}");
}

#[test]
fn config_module_settings_drive_a_file_backed_run() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("engine.yaml");
    let mut settings = EngineSettings::default();
    settings.state_root = temp.path().join("state");
    settings.checkpoints.max_per_run = 2;
    settings.default_budget.max_credits = 20;
    save_settings(&settings, &path).expect("save settings");
    let settings = load_settings(&path).expect("load settings");

    let store: Arc<dyn RunPersistence> = Arc::new(FileRunStore::new(settings.runs_root()));
    let log = settings.engine_log();
    let checkpoints = CheckpointManager::new(store.clone(), log.clone())
        .with_policy(settings.checkpoint_policy());
    let executor = TierExecutor::new(Arc::new(FixedCost), store.clone(), log)
        .with_checkpoint_manager(checkpoints)
        .with_settings(settings.execution_settings());

    let workflow: WorkflowDefinition = serde_json::from_value(json!({
        "type": "sequential",
        "id": "wf-config",
        "steps": [
            {"id": "one", "type": "api_call"},
            {"id": "two", "type": "api_call"},
            {"id": "three", "type": "api_call"}
        ]
    }))
    .expect("parse workflow");
    let outcome = executor.execute(RunRequest::new("user-1", workflow).with_run_id("run-config"));

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.resource_usage.credits, 12);
    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(
        store
            .list_checkpoints("run-config")
            .expect("list checkpoints")
            .len(),
        3
    );

    let log_path = engine_log_path(&settings.state_root);
    let events = read_log_lines(&log_path)
        .into_iter()
        .filter_map(|line| line["event"].as_str().map(str::to_string))
        .collect::<Vec<_>>();
    assert!(events.iter().any(|event| event == "run.transition"));
    assert!(!events.iter().any(|event| event == "checkpoint.pruned"));
    assert_eq!(
        settings.admission_log().path(),
        Some(settings.state_root.join("logs/admission.log").as_path())
    );
}
