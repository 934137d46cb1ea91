pub mod context;
pub mod control;
pub mod error;
pub mod model;
pub mod state;
pub mod state_machine;

pub use context::{RunContext, Scope};
pub use control::RunControl;
pub use error::StateError;
pub use model::{BranchRecord, BranchStatus, JoinRecord, Run, RunProgress};
pub use state::RunState;
pub use state_machine::{RunResourceUsage, RunStateMachine};
