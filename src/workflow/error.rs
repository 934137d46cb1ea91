#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigationError {
    #[error("workflow `{workflow_id}` is empty or does not match the `{navigator}` navigator")]
    CannotNavigate {
        workflow_id: String,
        navigator: &'static str,
    },
    #[error("workflow `{workflow_id}` definition is invalid: {reason}")]
    InvalidDefinition { workflow_id: String, reason: String },
    #[error("location `{location}` does not resolve to a step in workflow `{workflow_id}`")]
    UnknownLocation {
        workflow_id: String,
        location: String,
    },
}
