//! Generic checksummed state records (`states/state-<seq>.json`).
//!
//! One file per record. Files are never rewritten; a damaged file is skipped
//! on replay and the last intact record in sequence order wins.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::clock::now_ms;
use crate::core::frame::{decode_state, encode_state, seal_state};
use crate::core::types::PersistedState;

const PREFIX: &str = "state-";
const SUFFIX: &str = ".json";

/// Outcome of [`StateStore::recover_last_valid_state`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecovery {
    pub success: bool,
    pub state: Option<PersistedState>,
    pub logs_processed: usize,
    pub corrupted_logs_skipped: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Seal `data` under `id` and write it as the next record.
    ///
    /// Returns the file name written.
    #[instrument(skip_all, fields(id = %id))]
    pub fn append_log(&self, id: &str, data: Value) -> Result<String> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create state directory {}", self.dir.display()))?;
        let state = seal_state(id, now_ms(), data);
        let mut line = encode_state(&state)?;
        line.push('\n');

        let seq = self.sequence_files()?.last().map_or(1, |(seq, _)| seq + 1);
        let name = file_name(seq);
        let path = self.dir.join(&name);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("create state record {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("write state record {}", path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync state record {}", path.display()))?;
        debug!(file = %name, "state record appended");
        Ok(name)
    }

    /// Replay every record in sequence order, keeping the last intact one.
    #[instrument(skip_all)]
    pub fn recover_last_valid_state(&self) -> Result<StateRecovery> {
        let files = self.sequence_files()?;
        let mut last = None;
        let mut corrupted = 0;
        for (_, path) in &files {
            match read_record(path) {
                Some(state) => last = Some(state),
                None => corrupted += 1,
            }
        }
        let recovery = StateRecovery {
            success: last.is_some(),
            error: last.is_none().then(|| "no valid state found".to_string()),
            state: last,
            logs_processed: files.len(),
            corrupted_logs_skipped: corrupted,
        };
        info!(
            processed = recovery.logs_processed,
            corrupted = recovery.corrupted_logs_skipped,
            success = recovery.success,
            "state recovery finished"
        );
        Ok(recovery)
    }

    /// Delete the oldest records so that at most `max_to_keep` remain.
    pub fn prune_old_logs(&self, max_to_keep: usize) -> Result<usize> {
        let files = self.sequence_files()?;
        let excess = files.len().saturating_sub(max_to_keep);
        for (_, path) in files.iter().take(excess) {
            fs::remove_file(path).with_context(|| format!("prune {}", path.display()))?;
        }
        if excess > 0 {
            debug!(removed = excess, kept = max_to_keep, "state records pruned");
        }
        Ok(excess)
    }

    /// Intact records in sequence order.
    pub fn list_states(&self) -> Result<Vec<PersistedState>> {
        let mut states = Vec::new();
        for (_, path) in self.sequence_files()? {
            if let Some(state) = read_record(&path) {
                states.push(state);
            }
        }
        Ok(states)
    }

    fn sequence_files(&self) -> Result<Vec<(u64, PathBuf)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("list state directory {}", self.dir.display()));
            }
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry =
                entry.with_context(|| format!("list state directory {}", self.dir.display()))?;
            let name = entry.file_name();
            let Some(seq) = name.to_str().and_then(parse_sequence) else {
                continue;
            };
            files.push((seq, entry.path()));
        }
        files.sort_by_key(|(seq, _)| *seq);
        Ok(files)
    }
}

fn file_name(seq: u64) -> String {
    format!("{PREFIX}{seq:012}{SUFFIX}")
}

fn parse_sequence(name: &str) -> Option<u64> {
    name.strip_prefix(PREFIX)?
        .strip_suffix(SUFFIX)?
        .parse()
        .ok()
}

fn read_record(path: &Path) -> Option<PersistedState> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "skipping unreadable state record");
            return None;
        }
    };
    match decode_state(&String::from_utf8_lossy(&raw)) {
        Ok(state) => Some(state),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "skipping corrupted state record");
            None
        }
    }
}
