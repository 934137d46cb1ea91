use crate::resources::{ResourceLimits, ResourceUsage};
use crate::workflow::{StepType, WorkflowDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePoint {
    Initialization,
    Navigation,
    Allocation,
    Permission,
    Execution,
    Persistence,
    Cancelled,
}

impl FailurePoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::Navigation => "navigation",
            Self::Allocation => "allocation",
            Self::Permission => "permission",
            Self::Execution => "execution",
            Self::Persistence => "persistence",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailurePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub run_id: String,
    pub user_id: String,
    #[serde(default)]
    pub parent_run_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationInput {
    pub goal: String,
    #[serde(default)]
    pub team: Option<Value>,
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInput {
    pub workflow_id: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub definition: Option<WorkflowDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInput {
    pub step_id: String,
    pub step_type: StepType,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum TierInput {
    Coordination(CoordinationInput),
    Process(ProcessInput),
    Execution(ExecutionInput),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRequest {
    pub max_credits: u64,
    pub max_duration_ms: u64,
    pub max_memory_mb: u64,
}

impl AllocationRequest {
    pub fn from_limits(limits: &ResourceLimits) -> Self {
        Self {
            max_credits: limits.credits,
            max_duration_ms: limits.time_ms,
            max_memory_mb: limits.memory_mb,
        }
    }

    /// Limits for a budget built from this request. Tokens are not part of
    /// the wire shape and are carried over from `tokens`.
    pub fn to_limits(&self, tokens: u64) -> ResourceLimits {
        ResourceLimits::new(self.max_credits, tokens, self.max_duration_ms, self.max_memory_mb)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierRequest {
    pub context: RequestContext,
    pub input: TierInput,
    pub allocation: AllocationRequest,
    #[serde(default)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub run_id: String,
    #[serde(default)]
    pub failure_point: Option<FailurePoint>,
    #[serde(default)]
    pub resource_usage: ResourceUsage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierResponse {
    pub success: bool,
    #[serde(default)]
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub metadata: ResponseMetadata,
}

impl TierResponse {
    pub fn succeeded(run_id: impl Into<String>, outputs: Map<String, Value>, usage: ResourceUsage) -> Self {
        Self {
            success: true,
            outputs,
            error: None,
            metadata: ResponseMetadata {
                run_id: run_id.into(),
                failure_point: None,
                resource_usage: usage,
            },
        }
    }

    pub fn failed(
        run_id: impl Into<String>,
        error: impl Into<String>,
        failure_point: FailurePoint,
        usage: ResourceUsage,
    ) -> Self {
        Self {
            success: false,
            outputs: Map::new(),
            error: Some(error.into()),
            metadata: ResponseMetadata {
                run_id: run_id.into(),
                failure_point: Some(failure_point),
                resource_usage: usage,
            },
        }
    }
}

/// Raised by a delegate that could not produce a response. Any usage
/// incurred before the failure is still charged to the step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DelegationError {
    pub message: String,
    pub usage: ResourceUsage,
}

impl DelegationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            usage: ResourceUsage::default(),
        }
    }

    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// The next tier down. Calls block until the lower tier answers.
pub trait TierDelegate: Send + Sync {
    fn execute(&self, request: &TierRequest) -> Result<TierResponse, DelegationError>;
}
