use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::model::version::Payload;

/// Hex characters kept from the SHA-256 digest.
pub const CONTENT_HASH_LEN: usize = 16;

/// Deterministic fingerprint of a payload.
///
/// Keys are sorted at every nesting level before hashing, so two payloads
/// with the same content hash identically regardless of insertion order.
pub fn content_hash(payload: &Payload) -> String {
    let canonical = canonical_json(&Value::Object(payload.clone()));

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();

    digest[..CONTENT_HASH_LEN / 2]
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

/// Compact JSON with object keys in sorted order.
pub fn canonical_json(value: &Value) -> String {
    sort_keys(value).to_string()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
