//! Hashing System - SHA-256 over Canonical JSON
//!
//! Rendered graphs and stable asset identities are keyed by content, so the
//! same input always lands on the same digest.

use sha2::{Sha256, Digest};
use serde::Serialize;
use serde_json::{Value, to_string};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_value(v)))
                    .collect(),
            )
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Content hash of a rendered graph.
pub fn compute_graph_hash(graph: &Value) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_json(graph)?.as_bytes()))
}

/// Registry key for a stable identity tuple.
///
/// Components are hashed as a JSON array, so separators inside a filename
/// can never make two different tuples collide.
pub fn compute_identity_key(name: &str, subfolder: &str, kind: &str) -> String {
    let tuple = [name, subfolder, kind];
    // A string array always serializes.
    let canonical = to_string(&tuple).unwrap_or_default();
    sha256_hex(canonical.as_bytes())
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}
