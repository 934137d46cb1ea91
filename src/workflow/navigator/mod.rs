mod graph;
mod process;
mod sequential;

pub use graph::GraphNavigator;
pub use process::ProcessNavigator;
pub use sequential::SequentialNavigator;

use super::definition::{StepDefinition, StepType, WorkflowDefinition};
use super::error::NavigationError;
use super::location::Location;
use crate::run::RunContext;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub step_type: StepType,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl StepInfo {
    pub(crate) fn from_definition(step: &StepDefinition) -> Self {
        Self {
            id: step.id.clone(),
            name: step.name.clone().unwrap_or_else(|| step.id.clone()),
            description: step.description.clone(),
            step_type: step.step_type,
            config: step.config.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelBranch {
    pub id: String,
    pub start: Location,
}

/// Turns one workflow definition into traversable locations.
///
/// Every query is a pure function of the definition, the location and the
/// supplied context.
pub trait Navigator {
    fn kind(&self) -> &'static str;

    /// True iff `definition` has this navigator's shape and at least one step.
    fn can_navigate(&self, definition: &WorkflowDefinition) -> bool;

    fn start_location(&self) -> Result<Location, NavigationError>;

    /// Every location a run begins at; more than one when the entry fans out.
    fn start_locations(&self) -> Result<Vec<Location>, NavigationError> {
        Ok(vec![self.start_location()?])
    }

    fn next_locations(
        &self,
        current: &Location,
        context: &RunContext,
    ) -> Result<Vec<Location>, NavigationError>;

    fn is_end_location(&self, location: &Location, context: &RunContext) -> bool {
        self.next_locations(location, context)
            .map(|next| next.is_empty())
            .unwrap_or(true)
    }

    fn step_info(&self, location: &Location) -> Result<StepInfo, NavigationError>;

    fn total_steps(&self) -> usize;

    /// Branch entry points for parallel definitions; empty otherwise.
    fn parallel_branches(&self) -> Vec<ParallelBranch> {
        Vec::new()
    }

    /// Arrivals `location` needs before it may run. Locations behind a join
    /// wait for one arrival per inbound path.
    fn required_arrivals(&self, _location: &Location) -> u32 {
        1
    }
}

pub fn navigator_for(
    definition: &WorkflowDefinition,
) -> Result<Box<dyn Navigator + '_>, NavigationError> {
    let navigator: Box<dyn Navigator + '_> = match definition {
        WorkflowDefinition::Sequential(def) => Box::new(SequentialNavigator::new(def)),
        WorkflowDefinition::Graph(def) => Box::new(GraphNavigator::new(def)),
        WorkflowDefinition::Process(def) => Box::new(ProcessNavigator::new(def)),
    };
    if !navigator.can_navigate(definition) {
        return Err(NavigationError::CannotNavigate {
            workflow_id: definition.id().to_string(),
            navigator: navigator.kind(),
        });
    }
    Ok(navigator)
}

pub(crate) fn is_skipped(step: &StepDefinition, context: &RunContext) -> bool {
    step.skip_condition
        .as_ref()
        .is_some_and(|condition| condition.evaluate(context))
}
