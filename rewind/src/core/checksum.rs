//! Truncated SHA-256 digests over canonical record content.
//!
//! The digest detects corruption and accidental edits. It is not a security
//! primitive.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::types::PersistedState;

/// Hex characters kept from the full digest.
pub const CHECKSUM_LEN: usize = 16;

/// Digest of arbitrary bytes, truncated to [`CHECKSUM_LEN`] hex chars.
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let full = hex::encode(hasher.finalize());
    full[..CHECKSUM_LEN].to_string()
}

/// Checksum covering a state record's identity fields.
///
/// Computed over `{"data":..,"id":..,"timestamp":..}` with object keys sorted
/// at every depth, so key order in `data` never changes the result.
pub fn state_checksum(id: &str, timestamp: i64, data: &Value) -> String {
    let mut canonical = String::new();
    canonical.push_str("{\"data\":");
    write_canonical(data, &mut canonical);
    canonical.push_str(",\"id\":");
    canonical.push_str(&Value::String(id.to_string()).to_string());
    canonical.push_str(",\"timestamp\":");
    canonical.push_str(&timestamp.to_string());
    canonical.push('}');
    digest(canonical.as_bytes())
}

/// True if the stored checksum matches a fresh digest of the record.
pub fn verify_state(state: &PersistedState) -> bool {
    state.checksum == state_checksum(&state.id, state.timestamp, &state.data)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
