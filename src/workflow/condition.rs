use crate::run::RunContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Predicate over a run context. Evaluation only reads the context, so the
/// same context always yields the same answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Exists { path: String },
    Truthy { path: String },
    Equals { path: String, value: Value },
    NotEquals { path: String, value: Value },
    GreaterThan { path: String, value: f64 },
    LessThan { path: String, value: f64 },
    Contains { path: String, value: Value },
    Not { condition: Box<Condition> },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
}

impl Condition {
    pub fn evaluate(&self, context: &RunContext) -> bool {
        match self {
            Condition::Exists { path } => context
                .lookup(path)
                .is_some_and(|value| !value.is_null()),
            Condition::Truthy { path } => context.lookup(path).is_some_and(is_truthy),
            Condition::Equals { path, value } => context
                .lookup(path)
                .is_some_and(|actual| values_equal(actual, value)),
            Condition::NotEquals { path, value } => !context
                .lookup(path)
                .is_some_and(|actual| values_equal(actual, value)),
            Condition::GreaterThan { path, value } => context
                .lookup(path)
                .and_then(Value::as_f64)
                .is_some_and(|actual| actual > *value),
            Condition::LessThan { path, value } => context
                .lookup(path)
                .and_then(Value::as_f64)
                .is_some_and(|actual| actual < *value),
            Condition::Contains { path, value } => match context.lookup(path) {
                Some(Value::Array(items)) => items.iter().any(|item| values_equal(item, value)),
                Some(Value::String(text)) => value.as_str().is_some_and(|needle| text.contains(needle)),
                Some(Value::Object(map)) => value.as_str().is_some_and(|key| map.contains_key(key)),
                _ => false,
            },
            Condition::Not { condition } => !condition.evaluate(context),
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(context)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(context)),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty() && text != "false",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(left), Some(right)) => left == right,
        _ => actual == expected,
    }
}
