use super::context::RunContext;
use super::state::RunState;
use crate::workflow::Location;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRecord {
    pub branch_id: String,
    #[serde(default)]
    pub locations: Vec<Location>,
    pub status: BranchStatus,
}

/// A join location still waiting on some of its inbound paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRecord {
    pub location: Location,
    /// Locations whose completion reached this join, in arrival order.
    #[serde(default)]
    pub arrived_from: Vec<String>,
    pub required: u32,
}

impl JoinRecord {
    pub fn is_ready(&self) -> bool {
        self.arrived_from.len() as u32 >= self.required
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgress {
    pub total_steps: u32,
    pub completed_steps: u32,
    pub failed_steps: u32,
    pub skipped_steps: u32,
    #[serde(default)]
    pub current_location: Option<Location>,
    /// Pending locations still to visit, next one last.
    #[serde(default)]
    pub location_stack: Vec<Location>,
    #[serde(default)]
    pub branches: Vec<BranchRecord>,
    #[serde(default)]
    pub joins: Vec<JoinRecord>,
}

impl RunProgress {
    pub fn with_total(total_steps: u32) -> Self {
        Self {
            total_steps,
            ..Self::default()
        }
    }

    pub fn branch_mut(&mut self, branch_id: &str) -> Option<&mut BranchRecord> {
        self.branches
            .iter_mut()
            .find(|branch| branch.branch_id == branch_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub user_id: String,
    pub workflow_id: String,
    pub state: RunState,
    #[serde(default)]
    pub progress: RunProgress,
    #[serde(default)]
    pub context: RunContext,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Run {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        workflow_id: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            workflow_id: workflow_id.into(),
            state: RunState::Idle,
            progress: RunProgress::default(),
            context: RunContext::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_context(mut self, context: RunContext) -> Self {
        self.context = context;
        self
    }
}
