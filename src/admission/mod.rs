pub mod policy;
pub mod registry;
pub mod sweeper;

pub use policy::{
    check_long_running_tasks, AdmissionLimits, AdmissionReport, DEFAULT_MAX_ACTIVE_TASKS,
    DEFAULT_TASK_TIMEOUT_MS,
};
pub use registry::{
    ActiveTaskRecord, ActiveTaskRegistry, ActiveTaskStore, RunControlTable, SharedTaskRegistry,
};
pub use sweeper::{spawn_admission_sweeper, sweep_once, AdmissionSweeper};
