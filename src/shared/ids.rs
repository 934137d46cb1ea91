use getrandom::getrandom;

const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_SPACE: u32 = 36 * 36 * 36 * 36;

pub fn validate_identifier_value(kind: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{kind} must be non-empty"));
    }
    if value == "." || value == ".." {
        return Err(format!("{kind} must not be a relative path segment"));
    }
    if value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.')
    {
        return Ok(());
    }
    Err(format!(
        "{kind} must use only ASCII letters, digits, '-', '_' or '.'"
    ))
}

/// Produces `<prefix>-<base36 millis>-<4 random base36 chars>`.
pub fn generate_compact_id(prefix: &str, now_millis: i64) -> Result<String, String> {
    let timestamp = u64::try_from(now_millis)
        .map_err(|_| format!("{prefix} id requires a non-negative timestamp"))?;
    let mut bytes = [0_u8; 4];
    getrandom(&mut bytes)
        .map_err(|err| format!("failed to generate {prefix} id randomness: {err}"))?;
    let sample = u32::from_le_bytes(bytes) % ID_SUFFIX_SPACE;
    Ok(format!(
        "{prefix}-{}-{}",
        base36_encode_u64(timestamp),
        base36_encode_fixed_u32(sample, 4)
    ))
}

fn base36_encode_u64(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut chars = Vec::new();
    while value > 0 {
        chars.push(BASE36_ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }
    chars.iter().rev().collect()
}

fn base36_encode_fixed_u32(mut value: u32, width: usize) -> String {
    let mut chars = vec!['0'; width];
    for idx in (0..width).rev() {
        chars[idx] = BASE36_ALPHABET[(value % 36) as usize] as char;
        value /= 36;
    }
    chars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_ids_carry_prefix_and_fixed_suffix() {
        let id = generate_compact_id("ckpt", 1_700_000_000_000).expect("id");
        let parts = id.split('-').collect::<Vec<_>>();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ckpt");
        assert_eq!(parts[2].len(), 4);
        assert!(validate_identifier_value("checkpoint id", &id).is_ok());
    }

    #[test]
    fn negative_timestamps_are_rejected() {
        assert!(generate_compact_id("run", -1).is_err());
    }

    #[test]
    fn identifier_validation_rejects_spaces() {
        assert!(validate_identifier_value("step id", "bad id").is_err());
        assert!(validate_identifier_value("step id", "").is_err());
        assert!(validate_identifier_value("step id", "step_1").is_ok());
    }
}
