use super::allocation::{ResourceAllocation, ResourceDimension};
use crate::shared::EngineLog;
use serde_json::Value;

/// Hook fired after usage pushes an allocation past one of its limits.
///
/// Usage is reported after the work already happened, so implementations
/// can observe or escalate but cannot undo the consumption.
pub trait LimitPolicy: Send + Sync {
    fn on_limits_exceeded(&self, allocation: &ResourceAllocation, exceeded: &[ResourceDimension]);
}

#[derive(Debug, Clone, Default)]
pub struct LoggingLimitPolicy {
    log: EngineLog,
}

impl LoggingLimitPolicy {
    pub fn new(log: EngineLog) -> Self {
        Self { log }
    }
}

impl LimitPolicy for LoggingLimitPolicy {
    fn on_limits_exceeded(&self, allocation: &ResourceAllocation, exceeded: &[ResourceDimension]) {
        let dimensions = exceeded
            .iter()
            .map(|dim| Value::String(dim.as_str().to_string()))
            .collect::<Vec<_>>();
        self.log.warn(
            "allocator.limits_exceeded",
            &[
                ("allocationId", Value::String(allocation.id.clone())),
                ("dimensions", Value::Array(dimensions)),
                (
                    "consumed",
                    serde_json::to_value(allocation.consumed).unwrap_or(Value::Null),
                ),
                (
                    "limits",
                    serde_json::to_value(allocation.limits).unwrap_or(Value::Null),
                ),
            ],
        );
    }
}
