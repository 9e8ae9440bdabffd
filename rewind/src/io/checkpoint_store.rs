//! Checkpoint index (`checkpoints.json`) and snapshot files (`snapshots/`).
//!
//! This store is the only place checkpoint status changes. Snapshots are
//! written once, when their checkpoint begins, and never rewritten.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::atomic::write_json_atomic;
use super::layout::RewindPaths;
use super::safe_parser::SafeParser;
use crate::clock::now_ms;
use crate::core::types::{Checkpoint, CheckpointStatus, StateSnapshot, WalEntry};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointIndex {
    #[serde(default)]
    checkpoints: Vec<Checkpoint>,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    paths: RewindPaths,
    parser: SafeParser,
}

impl CheckpointStore {
    pub fn new(paths: &RewindPaths, parser: SafeParser) -> Self {
        Self {
            paths: paths.clone(),
            parser,
        }
    }

    /// All checkpoints in creation order.
    pub fn checkpoints(&self) -> Result<Vec<Checkpoint>> {
        Ok(self.load_index()?.checkpoints)
    }

    /// Most recently created checkpoint.
    pub fn last_checkpoint(&self) -> Result<Option<Checkpoint>> {
        Ok(self.load_index()?.checkpoints.pop())
    }

    pub fn checkpoint(&self, id: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .load_index()?
            .checkpoints
            .into_iter()
            .find(|checkpoint| checkpoint.id == id))
    }

    /// True iff any checkpoint is still active.
    pub fn has_incomplete_checkpoint(&self) -> Result<bool> {
        Ok(self.last_incomplete_checkpoint()?.is_some())
    }

    /// Most recently created checkpoint that is still active.
    pub fn last_incomplete_checkpoint(&self) -> Result<Option<Checkpoint>> {
        Ok(self
            .load_index()?
            .checkpoints
            .into_iter()
            .rev()
            .find(|checkpoint| !checkpoint.status.is_terminal()))
    }

    /// Load a snapshot. `None` if it does not exist.
    pub fn snapshot(&self, snapshot_id: &str) -> Result<Option<StateSnapshot>> {
        let path = self.paths.snapshot_path(snapshot_id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("read snapshot {}", path.display()));
            }
        };
        let snapshot: StateSnapshot = serde_json::from_str(&contents)
            .with_context(|| format!("parse snapshot {}", path.display()))?;
        Ok(Some(snapshot))
    }

    /// Validated log entries of one checkpoint, in log order.
    ///
    /// Corrupted lines are skipped (and reported by the parser's logging);
    /// ordering for undo is the caller's job.
    pub fn entries_for_checkpoint(&self, checkpoint_id: &str) -> Result<Vec<WalEntry>> {
        self.parser
            .frames_for_checkpoint(checkpoint_id, &self.paths.wal_path)
            .with_context(|| format!("load wal entries for checkpoint {checkpoint_id}"))
    }

    /// Capture a snapshot of `files` and register a new active checkpoint.
    ///
    /// Paths that do not exist yet are left out of the snapshot; their
    /// creation is undone from the log instead.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub fn begin_checkpoint(&self, task_id: &str, files: &[PathBuf]) -> Result<Checkpoint> {
        let timestamp = now_ms();
        let snapshot = StateSnapshot {
            id: format!("snap-{}", Uuid::new_v4()),
            timestamp,
            files: capture_files(files)?,
        };
        write_json_atomic(&self.paths.snapshot_path(&snapshot.id), &snapshot)?;

        let checkpoint = Checkpoint {
            id: format!("cp-{}", Uuid::new_v4()),
            snapshot_id: snapshot.id.clone(),
            task_id: Some(task_id.to_string()),
            status: CheckpointStatus::Active,
            created_at: timestamp,
            finalized_at: None,
        };
        let mut index = self.load_index()?;
        index.checkpoints.push(checkpoint.clone());
        self.write_index(&index)?;

        info!(
            checkpoint = %checkpoint.id,
            snapshot = %snapshot.id,
            files = snapshot.files.len(),
            "checkpoint created"
        );
        Ok(checkpoint)
    }

    /// Give the most recent active checkpoint a terminal status.
    pub fn finalize_checkpoint(&self, status: CheckpointStatus) -> Result<Checkpoint> {
        let target = self
            .last_incomplete_checkpoint()?
            .ok_or_else(|| anyhow!("no active checkpoint to finalize"))?;
        self.finalize_checkpoint_by_id(&target.id, status)
    }

    /// Give a specific checkpoint a terminal status.
    pub fn finalize_checkpoint_by_id(
        &self,
        checkpoint_id: &str,
        status: CheckpointStatus,
    ) -> Result<Checkpoint> {
        if !status.is_terminal() {
            return Err(anyhow!(
                "checkpoint status '{}' is not terminal",
                status.as_str()
            ));
        }
        let mut index = self.load_index()?;
        let checkpoint = index
            .checkpoints
            .iter_mut()
            .find(|checkpoint| checkpoint.id == checkpoint_id)
            .ok_or_else(|| anyhow!("checkpoint not found: {checkpoint_id}"))?;
        if checkpoint.status.is_terminal() {
            warn!(
                checkpoint = %checkpoint_id,
                from = %checkpoint.status,
                to = %status,
                "overwriting terminal checkpoint status"
            );
        }
        checkpoint.status = status;
        checkpoint.finalized_at = Some(now_ms());
        let updated = checkpoint.clone();
        self.write_index(&index)?;
        info!(checkpoint = %checkpoint_id, status = %status, "checkpoint finalized");
        Ok(updated)
    }

    fn load_index(&self) -> Result<CheckpointIndex> {
        let index_path = &self.paths.checkpoints_path;
        let contents = match fs::read_to_string(index_path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %index_path.display(), "no checkpoint index yet");
                return Ok(CheckpointIndex::default());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("read checkpoint index {}", index_path.display())
                });
            }
        };
        serde_json::from_str(&contents)
            .with_context(|| format!("parse checkpoint index {}", index_path.display()))
    }

    fn write_index(&self, index: &CheckpointIndex) -> Result<()> {
        write_json_atomic(&self.paths.checkpoints_path, index)
    }
}

fn capture_files(files: &[PathBuf]) -> Result<BTreeMap<String, String>> {
    let mut captured = BTreeMap::new();
    for path in files {
        match fs::read_to_string(path) {
            Ok(content) => {
                captured.insert(path.to_string_lossy().into_owned(), content);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "not captured, file does not exist yet");
            }
            Err(err) => {
                return Err(err).with_context(|| format!("capture {}", path.display()));
            }
        }
    }
    Ok(captured)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::io::action_log::ActionLog;
    use crate::io::layout::init_layout;

    fn store(root: &Path) -> (RewindPaths, CheckpointStore) {
        let paths = RewindPaths::new(root.join(".rewind"));
        init_layout(&paths).expect("layout");
        let store = CheckpointStore::new(&paths, SafeParser::default());
        (paths, store)
    }

    #[test]
    fn empty_store_has_no_checkpoints() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (_, store) = store(temp.path());
        assert!(store.checkpoints().expect("list").is_empty());
        assert_eq!(store.last_checkpoint().expect("last"), None);
        assert!(!store.has_incomplete_checkpoint().expect("incomplete"));
    }

    #[test]
    fn begin_captures_existing_files_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (paths, store) = store(temp.path());
        let present = temp.path().join("a.txt");
        let absent = temp.path().join("b.txt");
        fs::write(&present, "original").expect("seed");

        let checkpoint = store
            .begin_checkpoint("task-1", &[present.clone(), absent])
            .expect("begin");
        assert_eq!(checkpoint.status, CheckpointStatus::Active);
        assert_eq!(checkpoint.task_id.as_deref(), Some("task-1"));
        assert!(paths.snapshot_path(&checkpoint.snapshot_id).is_file());

        let snapshot = store
            .snapshot(&checkpoint.snapshot_id)
            .expect("load")
            .expect("snapshot exists");
        assert_eq!(snapshot.files.len(), 1);
        assert_eq!(
            snapshot.files.get(&present.to_string_lossy().into_owned()),
            Some(&"original".to_string())
        );
    }

    #[test]
    fn last_checkpoint_is_most_recent_and_incomplete_is_detected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (_, store) = store(temp.path());
        let first = store.begin_checkpoint("t1", &[]).expect("first");
        store
            .finalize_checkpoint(CheckpointStatus::Committed)
            .expect("commit first");
        let second = store.begin_checkpoint("t2", &[]).expect("second");

        assert_eq!(
            store.last_checkpoint().expect("last").map(|c| c.id),
            Some(second.id.clone())
        );
        assert!(store.has_incomplete_checkpoint().expect("incomplete"));
        assert_eq!(
            store.checkpoint(&first.id).expect("lookup").map(|c| c.status),
            Some(CheckpointStatus::Committed)
        );

        let finalized = store
            .finalize_checkpoint(CheckpointStatus::RolledBack)
            .expect("rollback second");
        assert_eq!(finalized.id, second.id);
        assert!(finalized.finalized_at.is_some());
        assert!(!store.has_incomplete_checkpoint().expect("incomplete"));
    }

    #[test]
    fn finalize_requires_terminal_status_and_active_checkpoint() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (_, store) = store(temp.path());
        let err = store
            .finalize_checkpoint(CheckpointStatus::Committed)
            .expect_err("nothing active");
        assert!(err.to_string().contains("no active checkpoint"));

        let checkpoint = store.begin_checkpoint("t", &[]).expect("begin");
        let err = store
            .finalize_checkpoint_by_id(&checkpoint.id, CheckpointStatus::Active)
            .expect_err("not terminal");
        assert!(err.to_string().contains("not terminal"));
        let err = store
            .finalize_checkpoint_by_id("cp-missing", CheckpointStatus::Committed)
            .expect_err("missing");
        assert!(err.to_string().contains("checkpoint not found"));
    }

    #[test]
    fn missing_snapshot_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (_, store) = store(temp.path());
        assert_eq!(store.snapshot("snap-missing").expect("load"), None);
    }

    #[test]
    fn entries_are_filtered_by_checkpoint() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (paths, store) = store(temp.path());
        let log = ActionLog::new(&paths.wal_path);
        log.tracker("cp-a")
            .write_file(&temp.path().join("a.txt"), "a")
            .expect("a");
        log.tracker("cp-b")
            .write_file(&temp.path().join("b.txt"), "b")
            .expect("b");

        let entries = store.entries_for_checkpoint("cp-a").expect("entries");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].target.ends_with("a.txt"));
    }
}
