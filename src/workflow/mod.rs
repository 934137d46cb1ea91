pub mod condition;
pub mod definition;
pub mod error;
pub mod location;
pub mod navigator;

pub use condition::Condition;
pub use definition::{
    BranchDefinition, ExecutionMode, GraphDefinition, GraphEdge, GraphNode, ProcessDefinition,
    ProcessElement, SequenceFlow, SequentialDefinition, StepDefinition, StepType,
    WorkflowDefinition,
};
pub use error::NavigationError;
pub use location::Location;
pub use navigator::{
    navigator_for, GraphNavigator, Navigator, ParallelBranch, ProcessNavigator,
    SequentialNavigator, StepInfo,
};
