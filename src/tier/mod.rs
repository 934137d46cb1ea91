mod error;
mod events;
mod executor;
mod gate;
mod protocol;

pub use error::ExecutionError;
pub use events::{EventSink, LogEventSink, NullEventSink, RecordingEventSink, RunEvent};
pub use executor::{ExecutionSettings, ResumeRequest, RunOutcome, RunRequest, TierExecutor};
pub use gate::{AllowAllGate, GateRequest, SecurityGate, StepTypeGate};
pub use protocol::{
    AllocationRequest, CoordinationInput, DelegationError, ExecutionInput, FailurePoint,
    ProcessInput, RequestContext, ResponseMetadata, TierDelegate, TierInput, TierRequest,
    TierResponse,
};
