//! Stable structural hashing for deriving storage keys.
//!
//! Two values with the same keys and values hash identically no matter the
//! order their object keys were inserted in. The hash only has to keep
//! distinct stores from sharing a storage slot; it is not a security
//! boundary.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Number of digest bytes kept in the hex identifier.
const HASH_BYTES: usize = 8;

/// Render `value` as compact JSON with object keys sorted at every level.
///
/// Independent of whether `serde_json` was built with `preserve_order`.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Deterministic hex identifier for a value's structure and contents.
pub fn stable_hash(value: &Value) -> String {
    let digest = Sha256::digest(canonical_json(value).as_bytes());
    digest[..HASH_BYTES]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Storage slot name: `store-<prefix>-<stateHash>-<optionsHash>`.
pub fn storage_name(prefix: &str, state_hash: &str, options_hash: &str) -> String {
    format!("store-{}-{}-{}", prefix, state_hash, options_hash)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
