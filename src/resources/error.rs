use super::allocation::ResourceDimension;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("allocation `{id}` already exists")]
    AlreadyExists { id: String },
    #[error("parent allocation `{parent_id}` not found")]
    ParentNotFound { parent_id: String },
    #[error("insufficient resources in parent `{parent_id}` for `{id}` ({dimensions})")]
    InsufficientParentResources {
        id: String,
        parent_id: String,
        dimensions: DimensionList,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionList(pub Vec<ResourceDimension>);

impl std::fmt::Display for DimensionList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self
            .0
            .iter()
            .map(|dim| dim.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{names}")
    }
}
