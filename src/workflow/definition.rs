use super::condition::Condition;
use super::error::NavigationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    LlmCall,
    ToolCall,
    CodeExecution,
    ApiCall,
    Subroutine,
}

impl StepType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LlmCall => "llm_call",
            Self::ToolCall => "tool_call",
            Self::CodeExecution => "code_execution",
            Self::ApiCall => "api_call",
            Self::Subroutine => "subroutine",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "llm_call" => Ok(Self::LlmCall),
            "tool_call" => Ok(Self::ToolCall),
            "code_execution" => Ok(Self::CodeExecution),
            "api_call" => Ok(Self::ApiCall),
            "subroutine" => Ok(Self::Subroutine),
            _ => Err(
                "step type must be one of: llm_call, tool_call, code_execution, api_call, subroutine"
                    .to_string(),
            ),
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub skip_condition: Option<Condition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchDefinition {
    pub id: String,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequentialDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub branches: Vec<BranchDefinition>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub step: StepDefinition,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    #[serde(default)]
    pub start: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessElement {
    StartEvent {
        id: String,
    },
    Task {
        id: String,
        step: StepDefinition,
    },
    ExclusiveGateway {
        id: String,
        #[serde(default, rename = "defaultFlow")]
        default_flow: Option<String>,
    },
    ParallelGateway {
        id: String,
    },
    EndEvent {
        id: String,
    },
}

impl ProcessElement {
    pub fn id(&self) -> &str {
        match self {
            Self::StartEvent { id }
            | Self::Task { id, .. }
            | Self::ExclusiveGateway { id, .. }
            | Self::ParallelGateway { id }
            | Self::EndEvent { id } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceFlow {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub elements: Vec<ProcessElement>,
    #[serde(default)]
    pub flows: Vec<SequenceFlow>,
}

/// Every workflow shape the engine can drive. Navigator selection matches
/// on this exhaustively.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowDefinition {
    Sequential(SequentialDefinition),
    Graph(GraphDefinition),
    Process(ProcessDefinition),
}

impl WorkflowDefinition {
    pub fn from_json_str(raw: &str) -> Result<Self, NavigationError> {
        serde_json::from_str(raw).map_err(|err| NavigationError::InvalidDefinition {
            workflow_id: "<unparsed>".to_string(),
            reason: err.to_string(),
        })
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, NavigationError> {
        serde_yaml::from_str(raw).map_err(|err| NavigationError::InvalidDefinition {
            workflow_id: "<unparsed>".to_string(),
            reason: err.to_string(),
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Sequential(def) => &def.id,
            Self::Graph(def) => &def.id,
            Self::Process(def) => &def.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sequential(_) => "sequential",
            Self::Graph(_) => "graph",
            Self::Process(_) => "process",
        }
    }

    /// Structural checks: unique ids and references that resolve.
    pub fn validate(&self) -> Result<(), NavigationError> {
        let invalid = |reason: String| NavigationError::InvalidDefinition {
            workflow_id: self.id().to_string(),
            reason,
        };

        match self {
            Self::Sequential(def) => {
                let ids = unique_ids(def.steps.iter().map(|step| step.id.as_str()))
                    .map_err(|id| invalid(format!("duplicate step id `{id}`")))?;
                for branch in &def.branches {
                    for step_id in &branch.steps {
                        if !ids.contains(step_id.as_str()) {
                            return Err(invalid(format!(
                                "branch `{}` references unknown step `{step_id}`",
                                branch.id
                            )));
                        }
                    }
                }
            }
            Self::Graph(def) => {
                let ids = unique_ids(def.nodes.iter().map(|node| node.id.as_str()))
                    .map_err(|id| invalid(format!("duplicate node id `{id}`")))?;
                for edge in &def.edges {
                    for end in [&edge.from, &edge.to] {
                        if !ids.contains(end.as_str()) {
                            return Err(invalid(format!("edge references unknown node `{end}`")));
                        }
                    }
                }
                if let Some(start) = &def.start {
                    if !ids.contains(start.as_str()) {
                        return Err(invalid(format!("start node `{start}` does not exist")));
                    }
                }
            }
            Self::Process(def) => {
                let ids = unique_ids(def.elements.iter().map(ProcessElement::id))
                    .map_err(|id| invalid(format!("duplicate element id `{id}`")))?;
                for flow in &def.flows {
                    for end in [&flow.source, &flow.target] {
                        if !ids.contains(end.as_str()) {
                            return Err(invalid(format!(
                                "flow `{}` references unknown element `{end}`",
                                flow.id
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn unique_ids<'a>(ids: impl Iterator<Item = &'a str>) -> Result<BTreeSet<&'a str>, String> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(id.to_string());
        }
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_yaml_definition() {
        let def = WorkflowDefinition::from_yaml_str(
            r#"
type: sequential
id: triage
steps:
  - id: classify
    type: llm_call
    config:
      model: small
  - id: notify
    type: api_call
    skipCondition:
      op: truthy
      path: quiet
"#,
        )
        .expect("parse");
        let WorkflowDefinition::Sequential(seq) = &def else {
            panic!("expected sequential definition");
        };
        assert_eq!(seq.steps.len(), 2);
        assert_eq!(seq.steps[1].step_type, StepType::ApiCall);
        assert!(seq.steps[1].skip_condition.is_some());
        assert_eq!(def.kind(), "sequential");
    }

    #[test]
    fn rejects_dangling_graph_edges() {
        let def = WorkflowDefinition::from_json_str(
            r#"{"type":"graph","id":"g","nodes":[{"id":"a","step":{"id":"a","type":"tool_call"}}],
                "edges":[{"from":"a","to":"b"}]}"#,
        )
        .expect("parse");
        let err = def.validate().expect_err("dangling edge");
        assert!(err.to_string().contains("unknown node `b`"));
    }
}
