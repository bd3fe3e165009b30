//! Canonical serialization and content hashing.
//!
//! Object keys are sorted recursively before hashing so two payloads that
//! differ only in key order produce the same digest.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Renders `value` as compact JSON with object keys sorted at every level.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Returns the hex-encoded SHA-256 of the canonical form of `value`.
#[must_use]
pub fn content_hash(value: &Value) -> String {
    hex::encode(Sha256::digest(canonical_json(value).as_bytes()))
}

/// Hash recorded as `output_hash`; empty for a null result.
#[must_use]
pub fn output_hash(result: &Value) -> String {
    if result.is_null() {
        String::new()
    } else {
        content_hash(result)
    }
}

/// Hashes any serializable value through its canonical JSON form.
pub(crate) fn hash_serializable<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_value(value).map(|json| content_hash(&json))
}

/// Returns whether `candidate` is a lowercase hex SHA-256 digest.
#[must_use]
pub fn is_content_hash(candidate: &str) -> bool {
    candidate.len() == HASH_HEX_LEN
        && candidate
            .bytes()
            .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (position, key) in keys.into_iter().enumerate() {
                if position > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                if let Some(entry) = map.get(key) {
                    write_canonical(entry, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (position, item) in items.iter().enumerate() {
                if position > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
