use super::{is_skipped, Navigator, ParallelBranch, StepInfo};
use crate::run::RunContext;
use crate::workflow::definition::{
    ExecutionMode, SequentialDefinition, StepDefinition, WorkflowDefinition,
};
use crate::workflow::error::NavigationError;
use crate::workflow::location::Location;

pub struct SequentialNavigator<'a> {
    definition: &'a SequentialDefinition,
}

impl<'a> SequentialNavigator<'a> {
    pub fn new(definition: &'a SequentialDefinition) -> Self {
        Self { definition }
    }

    fn unknown(&self, location: &Location) -> NavigationError {
        NavigationError::UnknownLocation {
            workflow_id: self.definition.id.clone(),
            location: location.id().to_string(),
        }
    }

    fn step_by_id(&self, step_id: &str) -> Option<&'a StepDefinition> {
        self.definition.steps.iter().find(|step| step.id == step_id)
    }

    fn branch_steps(&self, branch_id: &str) -> Option<Vec<&'a StepDefinition>> {
        let branch = self
            .definition
            .branches
            .iter()
            .find(|branch| branch.id == branch_id)?;
        branch
            .steps
            .iter()
            .map(|step_id| self.step_by_id(step_id))
            .collect()
    }

    fn resolve(&self, location: &Location) -> Option<&'a StepDefinition> {
        let index = location.step_index()?;
        match location.branch_id() {
            Some(branch_id) => self.branch_steps(branch_id)?.get(index).copied(),
            None => self.definition.steps.get(index),
        }
    }
}

fn next_unskipped(
    steps: &[&StepDefinition],
    after: usize,
    context: &RunContext,
) -> Option<usize> {
    (after + 1..steps.len()).find(|index| !is_skipped(steps[*index], context))
}

impl Navigator for SequentialNavigator<'_> {
    fn kind(&self) -> &'static str {
        "sequential"
    }

    fn can_navigate(&self, definition: &WorkflowDefinition) -> bool {
        match definition {
            WorkflowDefinition::Sequential(def) => match def.execution_mode {
                ExecutionMode::Sequential => !def.steps.is_empty(),
                ExecutionMode::Parallel => def.branches.iter().any(|b| !b.steps.is_empty()),
            },
            _ => false,
        }
    }

    fn start_location(&self) -> Result<Location, NavigationError> {
        if self.definition.steps.is_empty() {
            return Err(NavigationError::CannotNavigate {
                workflow_id: self.definition.id.clone(),
                navigator: self.kind(),
            });
        }
        Ok(Location::at_index(0))
    }

    fn next_locations(
        &self,
        current: &Location,
        context: &RunContext,
    ) -> Result<Vec<Location>, NavigationError> {
        let index = current.step_index().ok_or_else(|| self.unknown(current))?;

        if let Some(branch_id) = current.branch_id() {
            let steps = self
                .branch_steps(branch_id)
                .ok_or_else(|| self.unknown(current))?;
            if index >= steps.len() {
                return Err(self.unknown(current));
            }
            return Ok(next_unskipped(&steps, index, context)
                .map(|next| Location::in_branch(next, branch_id))
                .into_iter()
                .collect());
        }

        if self.definition.execution_mode == ExecutionMode::Parallel {
            return Ok(Vec::new());
        }
        if index >= self.definition.steps.len() {
            return Err(self.unknown(current));
        }
        let steps = self.definition.steps.iter().collect::<Vec<_>>();
        Ok(next_unskipped(&steps, index, context)
            .map(Location::at_index)
            .into_iter()
            .collect())
    }

    fn step_info(&self, location: &Location) -> Result<StepInfo, NavigationError> {
        self.resolve(location)
            .map(StepInfo::from_definition)
            .ok_or_else(|| self.unknown(location))
    }

    fn total_steps(&self) -> usize {
        match self.definition.execution_mode {
            ExecutionMode::Sequential => self.definition.steps.len(),
            ExecutionMode::Parallel => self
                .definition
                .branches
                .iter()
                .map(|branch| branch.steps.len())
                .sum(),
        }
    }

    fn parallel_branches(&self) -> Vec<ParallelBranch> {
        if self.definition.execution_mode != ExecutionMode::Parallel {
            return Vec::new();
        }
        self.definition
            .branches
            .iter()
            .filter(|branch| !branch.steps.is_empty())
            .map(|branch| ParallelBranch {
                id: branch.id.clone(),
                start: Location::in_branch(0, branch.id.clone()),
            })
            .collect()
    }
}
