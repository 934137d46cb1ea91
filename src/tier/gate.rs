use crate::workflow::{StepInfo, StepType};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub run_id: &'a str,
    pub user_id: &'a str,
    pub step: &'a StepInfo,
}

/// Permission check run before each step is delegated. `Err` carries the
/// denial reason.
pub trait SecurityGate: Send + Sync {
    fn check(&self, request: &GateRequest<'_>) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllGate;

impl SecurityGate for AllowAllGate {
    fn check(&self, _request: &GateRequest<'_>) -> Result<(), String> {
        Ok(())
    }
}

/// Allow-list of step types plus a deny-list of tool names (read from the
/// step's `toolName` config).
#[derive(Debug, Clone, Default)]
pub struct StepTypeGate {
    allowed_types: Option<BTreeSet<StepType>>,
    denied_tools: BTreeSet<String>,
}

impl StepTypeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_types(mut self, types: impl IntoIterator<Item = StepType>) -> Self {
        self.allowed_types
            .get_or_insert_with(BTreeSet::new)
            .extend(types);
        self
    }

    pub fn deny_tool(mut self, tool: impl Into<String>) -> Self {
        self.denied_tools.insert(tool.into());
        self
    }
}

impl SecurityGate for StepTypeGate {
    fn check(&self, request: &GateRequest<'_>) -> Result<(), String> {
        let step = request.step;
        if let Some(allowed) = &self.allowed_types {
            if !allowed.contains(&step.step_type) {
                return Err(format!(
                    "step type `{}` is not permitted for step `{}`",
                    step.step_type, step.id
                ));
            }
        }
        if let Some(tool) = step.config.get("toolName").and_then(|v| v.as_str()) {
            if self.denied_tools.contains(tool) {
                return Err(format!("tool `{tool}` is denied for step `{}`", step.id));
            }
        }
        Ok(())
    }
}
