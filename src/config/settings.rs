use super::{default_state_root, ConfigError};
use crate::admission::{AdmissionLimits, DEFAULT_MAX_ACTIVE_TASKS, DEFAULT_TASK_TIMEOUT_MS};
use crate::checkpoint::{
    CheckpointOptions, CheckpointPolicy, DEFAULT_CHECKPOINT_TTL_MS,
    DEFAULT_MAX_CHECKPOINTS_PER_RUN,
};
use crate::resources::ResourceLimits;
use crate::shared::logging::{admission_log_path, engine_log_path};
use crate::shared::EngineLog;
use crate::tier::ExecutionSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CheckpointSettings {
    #[serde(default = "default_max_per_run")]
    pub max_per_run: usize,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_interval_steps")]
    pub interval_steps: u32,
    #[serde(default = "default_true")]
    pub validate_on_restore: bool,
    #[serde(default)]
    pub compress: bool,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            max_per_run: default_max_per_run(),
            ttl_seconds: default_ttl_seconds(),
            interval_steps: default_interval_steps(),
            validate_on_restore: true,
            compress: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AdmissionSettings {
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            max_active: default_max_active(),
            task_timeout_ms: default_task_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct BudgetSettings {
    #[serde(default)]
    pub max_credits: u64,
    #[serde(default)]
    pub max_tokens: u64,
    #[serde(default)]
    pub max_time_ms: u64,
    #[serde(default)]
    pub max_memory_mb: u64,
}

impl BudgetSettings {
    pub fn to_limits(self) -> ResourceLimits {
        ResourceLimits::new(
            self.max_credits,
            self.max_tokens,
            self.max_time_ms,
            self.max_memory_mb,
        )
    }
}

impl Default for BudgetSettings {
    fn default() -> Self {
        let limits = ExecutionSettings::default().default_budget;
        Self {
            max_credits: limits.credits,
            max_tokens: limits.tokens,
            max_time_ms: limits.time_ms,
            max_memory_mb: limits.memory_mb,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineSettings {
    #[serde(default = "default_state_root")]
    pub state_root: PathBuf,
    #[serde(default)]
    pub checkpoints: CheckpointSettings,
    #[serde(default)]
    pub admission: AdmissionSettings,
    #[serde(default)]
    pub default_budget: BudgetSettings,
    #[serde(default)]
    pub step_budget: Option<BudgetSettings>,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            state_root: default_state_root(),
            checkpoints: CheckpointSettings::default(),
            admission: AdmissionSettings::default(),
            default_budget: BudgetSettings::default(),
            step_budget: None,
            max_steps: default_max_steps(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_per_run() -> usize {
    DEFAULT_MAX_CHECKPOINTS_PER_RUN
}

fn default_ttl_seconds() -> u64 {
    (DEFAULT_CHECKPOINT_TTL_MS / 1000) as u64
}

fn default_interval_steps() -> u32 {
    1
}

fn default_max_active() -> usize {
    DEFAULT_MAX_ACTIVE_TASKS
}

fn default_task_timeout_ms() -> u64 {
    DEFAULT_TASK_TIMEOUT_MS as u64
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

fn default_max_steps() -> u32 {
    ExecutionSettings::default().max_steps
}

impl EngineSettings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw, &path.display().to_string())
    }

    pub fn from_yaml_str(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_root.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "`state_root` must be non-empty".to_string(),
            ));
        }
        if self.checkpoints.max_per_run == 0 {
            return Err(ConfigError::Validation(
                "`checkpoints.max_per_run` must be greater than 0".to_string(),
            ));
        }
        if self.checkpoints.ttl_seconds == 0 {
            return Err(ConfigError::Validation(
                "`checkpoints.ttl_seconds` must be greater than 0".to_string(),
            ));
        }
        if self.admission.max_active == 0 {
            return Err(ConfigError::Validation(
                "`admission.max_active` must be greater than 0".to_string(),
            ));
        }
        if self.admission.task_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "`admission.task_timeout_ms` must be greater than 0".to_string(),
            ));
        }
        if self.admission.sweep_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "`admission.sweep_interval_ms` must be greater than 0".to_string(),
            ));
        }
        if self.default_budget.max_credits == 0 {
            return Err(ConfigError::Validation(
                "`default_budget.max_credits` must be greater than 0".to_string(),
            ));
        }
        if let Some(step) = &self.step_budget {
            if step.max_credits == 0 {
                return Err(ConfigError::Validation(
                    "`step_budget.max_credits` must be greater than 0".to_string(),
                ));
            }
        }
        if self.max_steps == 0 {
            return Err(ConfigError::Validation(
                "`max_steps` must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn checkpoint_policy(&self) -> CheckpointPolicy {
        CheckpointPolicy {
            max_per_run: self.checkpoints.max_per_run,
            ttl_ms: (self.checkpoints.ttl_seconds as i64).saturating_mul(1000),
        }
    }

    pub fn admission_limits(&self) -> AdmissionLimits {
        AdmissionLimits {
            max_active: self.admission.max_active,
            task_timeout_ms: self.admission.task_timeout_ms as i64,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.admission.sweep_interval_ms)
    }

    pub fn execution_settings(&self) -> ExecutionSettings {
        ExecutionSettings {
            default_budget: self.default_budget.to_limits(),
            step_budget: self.step_budget.map(BudgetSettings::to_limits),
            checkpoint_interval_steps: self.checkpoints.interval_steps,
            checkpoint_options: CheckpointOptions {
                compress: self.checkpoints.compress,
            },
            validate_on_restore: self.checkpoints.validate_on_restore,
            max_steps: self.max_steps,
        }
    }

    pub fn runs_root(&self) -> PathBuf {
        self.state_root.join("runs")
    }

    pub fn engine_log(&self) -> EngineLog {
        EngineLog::to_file(engine_log_path(&self.state_root))
    }

    pub fn admission_log(&self) -> EngineLog {
        EngineLog::to_file(admission_log_path(&self.state_root)).with_label("admission")
    }
}
