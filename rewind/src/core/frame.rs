//! Line codec for log records.
//!
//! Every record is a single JSON object. Decoding fails closed: a line either
//! yields a fully validated record or a [`FrameError`] naming the first
//! problem found.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use thiserror::Error;

use crate::core::checksum::{state_checksum, verify_state};
use crate::core::types::{ActionKind, PersistedState, WalEntry};

pub const WAL_ENTRY_SCHEMA: &str = include_str!("../../schemas/wal_entry.schema.json");

const REQUIRED_FIELDS: [&str; 6] = [
    "id",
    "checkpointId",
    "timestamp",
    "action",
    "target",
    "status",
];

/// Reason a single frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("malformed JSON: {0}")]
    Malformed(String),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("invalid action '{0}'")]
    InvalidAction(String),
    #[error("schema violation: {0}")]
    Schema(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("timestamp {timestamp} outside plausible range [{min}, {max}]")]
    TimestampOutOfRange { timestamp: i64, min: i64, max: i64 },
    #[error("checksum mismatch: stored {stored}, computed {computed}")]
    ChecksumMismatch { stored: String, computed: String },
}

/// Plausibility bounds for entry timestamps relative to "now".
///
/// Entries older than `max_age_ms` or further than `max_future_ms` ahead are
/// treated as corrupted numeric fields or clock skew.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampWindow {
    pub max_age_ms: i64,
    pub max_future_ms: i64,
}

impl TimestampWindow {
    pub const DEFAULT_MAX_AGE_MS: i64 = 365 * 24 * 60 * 60 * 1000;
    pub const DEFAULT_MAX_FUTURE_MS: i64 = 60 * 1000;

    pub fn new(max_age: Duration, max_future: Duration) -> Self {
        Self {
            max_age_ms: duration_ms(max_age),
            max_future_ms: duration_ms(max_future),
        }
    }

    /// Accept any timestamp. Useful for offline inspection of old logs.
    pub fn unbounded() -> Self {
        Self {
            max_age_ms: i64::MAX,
            max_future_ms: i64::MAX,
        }
    }

    pub fn check(&self, timestamp: i64, now_ms: i64) -> Result<(), FrameError> {
        let min = now_ms.saturating_sub(self.max_age_ms);
        let max = now_ms.saturating_add(self.max_future_ms);
        if timestamp < min || timestamp > max {
            return Err(FrameError::TimestampOutOfRange { timestamp, min, max });
        }
        Ok(())
    }
}

impl Default for TimestampWindow {
    fn default() -> Self {
        Self {
            max_age_ms: Self::DEFAULT_MAX_AGE_MS,
            max_future_ms: Self::DEFAULT_MAX_FUTURE_MS,
        }
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Encode a log entry as a single line (no trailing newline).
pub fn encode_entry(entry: &WalEntry) -> Result<String> {
    serde_json::to_string(entry).with_context(|| format!("encode wal entry {}", entry.id))
}

/// Validating decoder for file-action log lines.
///
/// Holds the compiled entry schema so a whole log can be decoded with one
/// compilation.
pub struct FrameDecoder {
    validator: jsonschema::Validator,
    window: TimestampWindow,
}

impl FrameDecoder {
    pub fn new(window: TimestampWindow) -> Result<Self> {
        let schema: Value =
            serde_json::from_str(WAL_ENTRY_SCHEMA).context("parse wal entry schema")?;
        let validator = jsonschema::validator_for(&schema)
            .map_err(|err| anyhow!("invalid wal entry schema: {}", err))?;
        Ok(Self { validator, window })
    }

    /// Decode and validate one line against structure, action kind, schema
    /// and the timestamp window.
    pub fn decode(&self, line: &str, now_ms: i64) -> Result<WalEntry, FrameError> {
        let value: Value =
            serde_json::from_str(line).map_err(|err| FrameError::Malformed(err.to_string()))?;
        let object = value.as_object().ok_or(FrameError::NotAnObject)?;

        for field in REQUIRED_FIELDS {
            match object.get(field) {
                None | Some(Value::Null) => return Err(FrameError::MissingField(field)),
                Some(_) => {}
            }
        }

        if let Some(raw) = object.get("action") {
            if raw.as_str().and_then(ActionKind::parse).is_none() {
                let shown = raw
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| raw.to_string());
                return Err(FrameError::InvalidAction(shown));
            }
        }

        let violations: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            return Err(FrameError::Schema(violations.join("; ")));
        }

        let entry: WalEntry =
            serde_json::from_value(value).map_err(|err| FrameError::Decode(err.to_string()))?;
        self.window.check(entry.timestamp, now_ms)?;
        Ok(entry)
    }
}

/// Build a state record with its checksum computed.
pub fn seal_state(id: impl Into<String>, timestamp: i64, data: Value) -> PersistedState {
    let id = id.into();
    let checksum = state_checksum(&id, timestamp, &data);
    PersistedState {
        id,
        timestamp,
        data,
        checksum,
    }
}

/// Encode a state record as a single line (no trailing newline).
pub fn encode_state(state: &PersistedState) -> Result<String> {
    serde_json::to_string(state).with_context(|| format!("encode state record {}", state.id))
}

/// Decode a state record and verify its checksum.
pub fn decode_state(raw: &str) -> Result<PersistedState, FrameError> {
    let state: PersistedState =
        serde_json::from_str(raw.trim()).map_err(|err| FrameError::Malformed(err.to_string()))?;
    if !verify_state(&state) {
        let computed = state_checksum(&state.id, state.timestamp, &state.data);
        return Err(FrameError::ChecksumMismatch {
            stored: state.checksum,
            computed,
        });
    }
    Ok(state)
}
