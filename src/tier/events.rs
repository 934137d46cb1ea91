use super::protocol::FailurePoint;
use crate::resources::ResourceUsage;
use crate::run::RunResourceUsage;
use crate::shared::EngineLog;
use crate::workflow::Location;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        run_id: String,
        workflow_id: String,
        resumed: bool,
    },
    StepStarted {
        run_id: String,
        step_id: String,
        attempt: u32,
        location: Location,
    },
    StepCompleted {
        run_id: String,
        step_id: String,
        attempt: u32,
        usage: ResourceUsage,
    },
    Paused {
        run_id: String,
    },
    Stopped {
        run_id: String,
        reason: Option<String>,
    },
    Completed {
        run_id: String,
        usage: RunResourceUsage,
    },
    Failed {
        run_id: String,
        error: String,
        failure_point: FailurePoint,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::Started { run_id, .. }
            | Self::StepStarted { run_id, .. }
            | Self::StepCompleted { run_id, .. }
            | Self::Paused { run_id }
            | Self::Stopped { run_id, .. }
            | Self::Completed { run_id, .. }
            | Self::Failed { run_id, .. } => run_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::Paused { .. } => "paused",
            Self::Stopped { .. } => "stopped",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Lifecycle observer. Emission must not fail the run.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &RunEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: &RunEvent) {}
}

#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<RunEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(RunEvent::name).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &RunEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Writes each event as a `run.event` line to an engine log.
#[derive(Debug, Clone, Default)]
pub struct LogEventSink {
    log: EngineLog,
}

impl LogEventSink {
    pub fn new(log: EngineLog) -> Self {
        Self { log }
    }
}

impl EventSink for LogEventSink {
    fn emit(&self, event: &RunEvent) {
        self.log.info(
            "run.event",
            &[(
                "payload",
                serde_json::to_value(event).unwrap_or(Value::Null),
            )],
        );
    }
}
