//! Hashing helpers used for stage signatures and checksums.
//!
//! - `sha256_hash`: order-sensitive digest over a list of string parts
//! - `sha256_bytes`: digest of raw bytes (patches, tree listings)
//! - `canonical_json`: key-sorted compact JSON

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Compute an order-sensitive SHA-256 hex digest over `parts`.
///
/// Parts are NUL-separated so that `["ab", "c"]` and `["a", "bc"]` differ.
pub fn sha256_hash<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of raw bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// `value` with every object rebuilt in byte order of its keys.
fn with_sorted_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&str, Value> = map
                .iter()
                .map(|(k, v)| (k.as_str(), with_sorted_keys(v)))
                .collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(with_sorted_keys).collect()),
        other => other.clone(),
    }
}

/// Compact JSON with sorted keys. Builder tasks and docker instructions
/// hash through this so that key order in the config never matters.
pub fn canonical_json(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&with_sorted_keys(value))?)
}

/// Canonical JSON of any serializable value.
pub fn canonical_json_of<T: serde::Serialize>(value: &T) -> Result<String> {
    canonical_json(&serde_json::to_value(value)?)
}
