use super::{is_skipped, Navigator, StepInfo};
use crate::run::RunContext;
use crate::workflow::definition::{ProcessDefinition, ProcessElement, SequenceFlow, WorkflowDefinition};
use crate::workflow::error::NavigationError;
use crate::workflow::location::Location;
use std::collections::BTreeSet;

/// Navigates externally described process graphs. Only tasks become
/// locations; events and gateways are resolved on the way.
pub struct ProcessNavigator<'a> {
    definition: &'a ProcessDefinition,
}

impl<'a> ProcessNavigator<'a> {
    pub fn new(definition: &'a ProcessDefinition) -> Self {
        Self { definition }
    }

    fn element(&self, id: &str) -> Option<&'a ProcessElement> {
        self.definition
            .elements
            .iter()
            .find(|element| element.id() == id)
    }

    fn outgoing(&self, source: &str) -> impl Iterator<Item = &'a SequenceFlow> + '_ {
        let source = source.to_string();
        self.definition
            .flows
            .iter()
            .filter(move |flow| flow.source == source)
    }

    fn unknown(&self, location: &Location) -> NavigationError {
        NavigationError::UnknownLocation {
            workflow_id: self.definition.id.clone(),
            location: location.id().to_string(),
        }
    }

    fn flows_taken(&self, element: &ProcessElement, context: &RunContext) -> Vec<&'a SequenceFlow> {
        match element {
            ProcessElement::ExclusiveGateway { id, default_flow } => {
                let chosen = self
                    .outgoing(id)
                    .filter(|flow| Some(&flow.id) != default_flow.as_ref())
                    .find(|flow| {
                        flow.condition
                            .as_ref()
                            .is_none_or(|condition| condition.evaluate(context))
                    })
                    .or_else(|| {
                        default_flow
                            .as_ref()
                            .and_then(|default| self.outgoing(id).find(|flow| &flow.id == default))
                    });
                chosen.into_iter().collect()
            }
            ProcessElement::EndEvent { .. } => Vec::new(),
            other => self
                .outgoing(other.id())
                .filter(|flow| {
                    flow.condition
                        .as_ref()
                        .is_none_or(|condition| condition.evaluate(context))
                })
                .collect(),
        }
    }

    fn resolve_targets(
        &self,
        element: &ProcessElement,
        context: &RunContext,
        visited: &mut BTreeSet<String>,
        out: &mut Vec<Location>,
    ) {
        for flow in self.flows_taken(element, context) {
            if !visited.insert(flow.target.clone()) {
                continue;
            }
            let Some(target) = self.element(&flow.target) else {
                continue;
            };
            match target {
                ProcessElement::Task { id, step } if !is_skipped(step, context) => {
                    out.push(Location::at_node(id.clone()));
                }
                ProcessElement::EndEvent { .. } => {}
                other => self.resolve_targets(other, context, visited, out),
            }
        }
    }

    fn incoming(&self, target: &str) -> impl Iterator<Item = &'a SequenceFlow> + '_ {
        let target = target.to_string();
        self.definition
            .flows
            .iter()
            .filter(move |flow| flow.target == target)
    }

        fn start_event(&self) -> Option<&'a ProcessElement> {
        self.definition
            .elements
            .iter()
            .find(|element| matches!(element, ProcessElement::StartEvent { .. }))
    }
}

impl Navigator for ProcessNavigator<'_> {
    fn kind(&self) -> &'static str {
        "process"
    }

    fn can_navigate(&self, definition: &WorkflowDefinition) -> bool {
        matches!(
            definition,
            WorkflowDefinition::Process(def)
                if def.elements.iter().any(|e| matches!(e, ProcessElement::Task { .. }))
        )
    }

    fn start_location(&self) -> Result<Location, NavigationError> {
        self.start_locations()?
            .into_iter()
            .next()
            .ok_or_else(|| NavigationError::CannotNavigate {
                workflow_id: self.definition.id.clone(),
                navigator: "process",
            })
    }

    /// Every task reachable from the start event, in flow order. Gateway
    /// conditions on the way are evaluated against an empty context.
    fn start_locations(&self) -> Result<Vec<Location>, NavigationError> {
        let cannot = || NavigationError::CannotNavigate {
            workflow_id: self.definition.id.clone(),
            navigator: "process",
        };
        let start = self.start_event().ok_or_else(cannot)?;
        let mut visited = BTreeSet::from([start.id().to_string()]);
        let mut out = Vec::new();
        self.resolve_targets(start, &RunContext::default(), &mut visited, &mut out);
        if out.is_empty() {
            return Err(cannot());
        }
        Ok(out)
    }

    fn next_locations(
        &self,
        current: &Location,
        context: &RunContext,
    ) -> Result<Vec<Location>, NavigationError> {
        let element = current
            .node_id()
            .and_then(|id| self.element(id))
            .filter(|element| matches!(element, ProcessElement::Task { .. }))
            .ok_or_else(|| self.unknown(current))?;
        let mut visited = BTreeSet::from([element.id().to_string()]);
        let mut out = Vec::new();
        self.resolve_targets(element, context, &mut visited, &mut out);
        Ok(out)
    }

    fn step_info(&self, location: &Location) -> Result<StepInfo, NavigationError> {
        match location.node_id().and_then(|id| self.element(id)) {
            Some(ProcessElement::Task { step, .. }) => Ok(StepInfo::from_definition(step)),
            _ => Err(self.unknown(location)),
        }
    }

    /// A task directly behind a parallel gateway waits for every flow into
    /// that gateway.
    fn required_arrivals(&self, location: &Location) -> u32 {
        let Some(task_id) = location.node_id() else {
            return 1;
        };
        self.incoming(task_id)
            .map(|flow| match self.element(&flow.source) {
                Some(ProcessElement::ParallelGateway { id }) => self.incoming(id).count() as u32,
                _ => 1,
            })
            .max()
            .unwrap_or(1)
            .max(1)
    }

        fn total_steps(&self) -> usize {
        self.definition
            .elements
            .iter()
            .filter(|element| matches!(element, ProcessElement::Task { .. }))
            .count()
    }
}
