use serde::{Deserialize, Serialize};

/// Pointer into a workflow's step sequence.
///
/// Fields are private and there are no setters; navigators produce new
/// locations rather than mutating existing ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    id: String,
    #[serde(default)]
    step_index: Option<usize>,
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    branch_id: Option<String>,
}

impl Location {
    pub fn at_index(index: usize) -> Self {
        Self {
            id: index.to_string(),
            step_index: Some(index),
            node_id: None,
            branch_id: None,
        }
    }

    pub fn at_node(node_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        Self {
            id: node_id.clone(),
            step_index: None,
            node_id: Some(node_id),
            branch_id: None,
        }
    }

    pub fn in_branch(index: usize, branch_id: impl Into<String>) -> Self {
        let branch_id = branch_id.into();
        Self {
            id: format!("{branch_id}:{index}"),
            step_index: Some(index),
            node_id: None,
            branch_id: Some(branch_id),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn step_index(&self) -> Option<usize> {
        self.step_index
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn branch_id(&self) -> Option<&str> {
        self.branch_id.as_deref()
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}
