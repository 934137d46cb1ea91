use super::{is_skipped, Navigator, StepInfo};
use crate::run::RunContext;
use crate::workflow::definition::{GraphDefinition, GraphNode, WorkflowDefinition};
use crate::workflow::error::NavigationError;
use crate::workflow::location::Location;
use std::collections::BTreeSet;

pub struct GraphNavigator<'a> {
    definition: &'a GraphDefinition,
}

impl<'a> GraphNavigator<'a> {
    pub fn new(definition: &'a GraphDefinition) -> Self {
        Self { definition }
    }

    fn node(&self, node_id: &str) -> Option<&'a GraphNode> {
        self.definition.nodes.iter().find(|node| node.id == node_id)
    }

    fn unknown(&self, location: &Location) -> NavigationError {
        NavigationError::UnknownLocation {
            workflow_id: self.definition.id.clone(),
            location: location.id().to_string(),
        }
    }

    /// Targets of every edge leaving `node_id` whose condition holds, in
    /// edge declaration order. Skipped nodes are replaced by their own
    /// successors.
    fn successors(
        &self,
        node_id: &str,
        context: &RunContext,
        visited: &mut BTreeSet<String>,
        out: &mut Vec<Location>,
    ) {
        for edge in self.definition.edges.iter().filter(|edge| edge.from == node_id) {
            if let Some(condition) = &edge.condition {
                if !condition.evaluate(context) {
                    continue;
                }
            }
            if !visited.insert(edge.to.clone()) {
                continue;
            }
            match self.node(&edge.to) {
                Some(node) if is_skipped(&node.step, context) => {
                    self.successors(&node.id, context, visited, out);
                }
                Some(node) => out.push(Location::at_node(node.id.clone())),
                None => {}
            }
        }
    }

    /// Every node reachable from `node_id` along any edge, itself included.
    fn reachable_from(&self, node_id: &str) -> BTreeSet<&'a str> {
        let mut seen = BTreeSet::new();
        let mut pending = vec![node_id.to_string()];
        while let Some(current) = pending.pop() {
            for edge in self.definition.edges.iter().filter(|edge| edge.from == current) {
                if seen.insert(edge.to.as_str()) {
                    pending.push(edge.to.clone());
                }
            }
        }
        if let Some(node) = self.node(node_id) {
            seen.insert(node.id.as_str());
        }
        seen
    }
}

impl Navigator for GraphNavigator<'_> {
    fn kind(&self) -> &'static str {
        "graph"
    }

    fn can_navigate(&self, definition: &WorkflowDefinition) -> bool {
        matches!(definition, WorkflowDefinition::Graph(def) if !def.nodes.is_empty())
    }

    fn start_location(&self) -> Result<Location, NavigationError> {
        self.start_locations()?
            .into_iter()
            .next()
            .ok_or_else(|| NavigationError::CannotNavigate {
                workflow_id: self.definition.id.clone(),
                navigator: self.kind(),
            })
    }

    /// The explicit start node, else every node no edge points at, in
    /// declaration order. A graph with no such node starts at its first node.
    fn start_locations(&self) -> Result<Vec<Location>, NavigationError> {
        if let Some(start) = &self.definition.start {
            return self
                .node(start)
                .map(|node| vec![Location::at_node(node.id.clone())])
                .ok_or_else(|| NavigationError::InvalidDefinition {
                    workflow_id: self.definition.id.clone(),
                    reason: format!("start node `{start}` does not exist"),
                });
        }
        let targets = self
            .definition
            .edges
            .iter()
            .map(|edge| edge.to.as_str())
            .collect::<BTreeSet<_>>();
        let mut roots = self
            .definition
            .nodes
            .iter()
            .filter(|node| !targets.contains(node.id.as_str()))
            .map(|node| Location::at_node(node.id.clone()))
            .collect::<Vec<_>>();
        if roots.is_empty() {
            roots.extend(
                self.definition
                    .nodes
                    .first()
                    .map(|node| Location::at_node(node.id.clone())),
            );
        }
        if roots.is_empty() {
            return Err(NavigationError::CannotNavigate {
                workflow_id: self.definition.id.clone(),
                navigator: self.kind(),
            });
        }
        Ok(roots)
    }

    fn next_locations(
        &self,
        current: &Location,
        context: &RunContext,
    ) -> Result<Vec<Location>, NavigationError> {
        let node_id = current.node_id().ok_or_else(|| self.unknown(current))?;
        if self.node(node_id).is_none() {
            return Err(self.unknown(current));
        }
        let mut visited = BTreeSet::from([node_id.to_string()]);
        let mut out = Vec::new();
        self.successors(node_id, context, &mut visited, &mut out);
        Ok(out)
    }

    fn step_info(&self, location: &Location) -> Result<StepInfo, NavigationError> {
        location
            .node_id()
            .and_then(|node_id| self.node(node_id))
            .map(|node| StepInfo::from_definition(&node.step))
            .ok_or_else(|| self.unknown(location))
    }

    /// One arrival per distinct predecessor node. Predecessors the node can
    /// itself reach close a loop and do not count.
    fn required_arrivals(&self, location: &Location) -> u32 {
        let Some(node_id) = location.node_id() else {
            return 1;
        };
        let downstream = self.reachable_from(node_id);
        let predecessors = self
            .definition
            .edges
            .iter()
            .filter(|edge| edge.to == node_id && !downstream.contains(edge.from.as_str()))
            .map(|edge| edge.from.as_str())
            .collect::<BTreeSet<_>>();
        (predecessors.len() as u32).max(1)
    }

        fn total_steps(&self) -> usize {
        self.definition.nodes.len()
    }
}
