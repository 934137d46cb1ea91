use super::types::Checkpoint;
use crate::resources::ResourceUsage;
use crate::run::{RunContext, RunProgress, RunState};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DigestInput<'a> {
    run_id: &'a str,
    state: RunState,
    progress: &'a Option<RunProgress>,
    context: &'a Option<RunContext>,
    consumed: &'a ResourceUsage,
    steps_executed: u32,
}

/// SHA-256 over the canonical JSON of the fields a restore applies.
pub fn checkpoint_digest(checkpoint: &Checkpoint) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(&DigestInput {
        run_id: &checkpoint.run_id,
        state: checkpoint.state,
        progress: &checkpoint.progress,
        context: &checkpoint.context,
        consumed: &checkpoint.consumed,
        steps_executed: checkpoint.steps_executed,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(to_hex(&hasher.finalize()))
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    const HEX: &[u8; 16] = b"0123456789abcdef";
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

/// Best-effort size reduction applied to a context before it is stored.
pub trait ContextCompressor: Send + Sync {
    fn compress(&self, context: &RunContext) -> RunContext;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl ContextCompressor for NoCompression {
    fn compress(&self, context: &RunContext) -> RunContext {
        context.clone()
    }
}

/// Drops `null` entries from variables, blackboard and scope variables,
/// recursively inside nested objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropNulls;

impl ContextCompressor for DropNulls {
    fn compress(&self, context: &RunContext) -> RunContext {
        let mut compressed = context.clone();
        strip_nulls(&mut compressed.variables);
        strip_nulls(&mut compressed.blackboard);
        for scope in &mut compressed.scopes {
            strip_nulls(&mut scope.variables);
        }
        compressed
    }
}

fn strip_nulls(map: &mut Map<String, Value>) {
    map.retain(|_, value| !value.is_null());
    for value in map.values_mut() {
        if let Value::Object(inner) = value {
            strip_nulls(inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drop_nulls_recurses_into_objects() {
        let mut context = RunContext::default();
        context.variables.insert("gone".to_string(), Value::Null);
        context
            .variables
            .insert("kept".to_string(), json!({"a": null, "b": 1}));
        let compressed = DropNulls.compress(&context);
        assert!(!compressed.variables.contains_key("gone"));
        assert_eq!(compressed.variables["kept"], json!({"b": 1}));
    }

    #[test]
    fn digest_is_hex_sha256() {
        let checkpoint = Checkpoint {
            id: "c".to_string(),
            run_id: "r".to_string(),
            created_at: 0,
            sequence: 0,
            state: RunState::Running,
            progress: Some(RunProgress::default()),
            context: Some(RunContext::default()),
            size_bytes: 0,
            digest: String::new(),
            compressed: false,
            consumed: Default::default(),
            steps_executed: 0,
        };
        let digest = checkpoint_digest(&checkpoint).expect("digest");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
