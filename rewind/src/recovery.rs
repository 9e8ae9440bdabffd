//! Crash recovery: undo a checkpoint's logged mutations.
//!
//! A run walks `Idle -> SelectingCheckpoint -> LoadingSnapshot -> Replaying ->
//! Finalizing` and ends in `Succeeded` or `Failed`. Only lookup failures end a
//! run early. Every entry is attempted even after earlier entries fail; each
//! failure is recorded with its target and the run continues.
//!
//! There is no internal locking. Callers serialize recovery per workspace
//! (the CLI holds [`crate::io::lock::WorkspaceLock`]).

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::replay::{
    PlannedRestore, Undo, entries_outside_snapshot, planned_restorations,
    planned_snapshot_restorations, undo_for, undo_order,
};
use crate::core::types::{ActionKind, Checkpoint, CheckpointStatus, StateSnapshot, WalEntry};
use crate::io::activity_log::ActivityLog;
use crate::io::checkpoint_store::CheckpointStore;
use crate::retry::RetryPolicy;

pub const NO_CHECKPOINT: &str = "No checkpoint found for recovery";
pub const SNAPSHOT_NOT_FOUND: &str = "Snapshot not found";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryOptions {
    /// Report what would be restored without touching anything.
    pub dry_run: bool,
    /// Allow recovering a checkpoint that is already committed or rolled back.
    pub force: bool,
    /// Recover this checkpoint instead of the most recent one.
    pub target_checkpoint_id: Option<String>,
    /// Rewrite snapshot files from the snapshot and only replay entries for
    /// paths the snapshot does not cover.
    pub restore_to_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    Idle,
    SelectingCheckpoint,
    LoadingSnapshot,
    Replaying,
    Finalizing,
    Succeeded,
    Failed,
}

impl RecoveryPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryPhase::Idle => "idle",
            RecoveryPhase::SelectingCheckpoint => "selecting_checkpoint",
            RecoveryPhase::LoadingSnapshot => "loading_snapshot",
            RecoveryPhase::Replaying => "replaying",
            RecoveryPhase::Finalizing => "finalizing",
            RecoveryPhase::Succeeded => "succeeded",
            RecoveryPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to undo a single entry. Never aborts the run.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("{target}: {action} entry has no previous state")]
    MissingPreviousState { target: String, action: ActionKind },
    #[error("{target}: directory is not empty")]
    DirectoryNotEmpty { target: String },
    #[error("{target}: {source}")]
    Io {
        target: String,
        #[source]
        source: io::Error,
    },
}

/// What undoing a single entry did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Content or directory put back.
    Restored(String),
    /// Something the task created was removed.
    RolledBack(String),
    /// Not reversible by design (metadata).
    Skipped(String),
    /// Already in the undone state.
    Unchanged,
}

/// Structured outcome of a recovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResult {
    pub success: bool,
    pub phase: RecoveryPhase,
    pub checkpoint_id: Option<String>,
    pub dry_run: bool,
    /// The checkpoint was marked rolled back by this run.
    pub finalized: bool,
    pub restored_files: Vec<String>,
    pub rolled_back_files: Vec<String>,
    pub skipped: Vec<String>,
    /// Dry runs only: what a real run would restore, in undo order.
    pub planned: Vec<PlannedRestore>,
    pub errors: Vec<String>,
}

impl RecoveryResult {
    fn new(dry_run: bool) -> Self {
        Self {
            success: false,
            phase: RecoveryPhase::Idle,
            checkpoint_id: None,
            dry_run,
            finalized: false,
            restored_files: Vec::new(),
            rolled_back_files: Vec::new(),
            skipped: Vec::new(),
            planned: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn enter(&mut self, phase: RecoveryPhase) {
        debug!(from = %self.phase, to = %phase, "recovery phase");
        self.phase = phase;
    }

    fn fail(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(phase = %self.phase, error = %message, "recovery failed");
        self.errors.push(message);
        self.success = false;
        self.phase = RecoveryPhase::Failed;
        self
    }

    fn finish(&mut self) {
        self.success = self.errors.is_empty();
        let phase = if self.success {
            RecoveryPhase::Succeeded
        } else {
            RecoveryPhase::Failed
        };
        self.enter(phase);
    }

    fn absorb(&mut self, outcome: Result<RestoreOutcome, RestoreError>) {
        match outcome {
            Ok(RestoreOutcome::Restored(target)) => push_unique(&mut self.restored_files, target),
            Ok(RestoreOutcome::RolledBack(target)) => {
                push_unique(&mut self.rolled_back_files, target);
            }
            Ok(RestoreOutcome::Skipped(target)) => push_unique(&mut self.skipped, target),
            Ok(RestoreOutcome::Unchanged) => {}
            Err(err) => {
                warn!(error = %err, "restore failed, continuing");
                self.errors.push(err.to_string());
            }
        }
    }
}

/// Result of comparing the workspace against a checkpoint's snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub valid: bool,
    pub differences: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RecoveryManager {
    store: CheckpointStore,
    activity: ActivityLog,
}

impl RecoveryManager {
    pub fn new(store: CheckpointStore, activity: ActivityLog) -> Self {
        Self { store, activity }
    }

    pub fn needs_recovery(&self) -> Result<bool> {
        self.store.has_incomplete_checkpoint()
    }

    /// Run a recovery. Expected failures are reported in the result; `Err`
    /// means the stores themselves could not be read or written.
    #[instrument(skip_all, fields(dry_run = options.dry_run))]
    pub fn recover(&self, options: &RecoveryOptions) -> Result<RecoveryResult> {
        let mut result = RecoveryResult::new(options.dry_run);

        result.enter(RecoveryPhase::SelectingCheckpoint);
        let checkpoint = match self.select(options.target_checkpoint_id.as_deref())? {
            Ok(checkpoint) => checkpoint,
            Err(message) => return Ok(result.fail(message)),
        };
        result.checkpoint_id = Some(checkpoint.id.clone());
        if !options.dry_run && !options.force && checkpoint.status.is_terminal() {
            return Ok(result.fail(format!(
                "Checkpoint {} is already {}",
                checkpoint.id, checkpoint.status
            )));
        }

        result.enter(RecoveryPhase::LoadingSnapshot);
        let Some(snapshot) = self.store.snapshot(&checkpoint.snapshot_id)? else {
            return Ok(result.fail(SNAPSHOT_NOT_FOUND));
        };

        let ordered = undo_order(self.store.entries_for_checkpoint(&checkpoint.id)?);
        result.enter(RecoveryPhase::Replaying);
        if options.dry_run {
            result.planned = if options.restore_to_start {
                planned_snapshot_restorations(ordered, &snapshot.files)
            } else {
                planned_restorations(&ordered)
            };
            for planned in &result.planned {
                info!(path = %planned.target, action = %planned.action, "would restore");
            }
            result.finish();
            return Ok(result);
        }

        self.note(&format!(
            "Recovery started for checkpoint {} ({} entries)",
            checkpoint.id,
            ordered.len()
        ));
        if options.restore_to_start {
            for entry in &entries_outside_snapshot(ordered, &snapshot.files) {
                result.absorb(undo_entry(entry));
            }
            restore_snapshot_files(&snapshot, &mut result);
        } else {
            for entry in &ordered {
                result.absorb(undo_entry(entry));
            }
        }

        self.finalize(&checkpoint, &mut result)?;
        Ok(result)
    }

    /// Run [`Self::recover`] under `policy`. Only hard errors are retried.
    pub fn recover_with_retry<P: RetryPolicy>(
        &self,
        policy: &P,
        options: &RecoveryOptions,
    ) -> Result<RecoveryResult> {
        policy.execute("recovery", || self.recover(options))
    }

    /// Rewrite every snapshot file to its captured content, ignoring the log.
    #[instrument(skip_all)]
    pub fn restore_to_exact_start(&self, checkpoint_id: Option<&str>) -> Result<RecoveryResult> {
        let mut result = RecoveryResult::new(false);

        result.enter(RecoveryPhase::SelectingCheckpoint);
        let checkpoint = match self.select(checkpoint_id)? {
            Ok(checkpoint) => checkpoint,
            Err(message) => return Ok(result.fail(message)),
        };
        result.checkpoint_id = Some(checkpoint.id.clone());

        result.enter(RecoveryPhase::LoadingSnapshot);
        let Some(snapshot) = self.store.snapshot(&checkpoint.snapshot_id)? else {
            return Ok(result.fail(SNAPSHOT_NOT_FOUND));
        };

        result.enter(RecoveryPhase::Replaying);
        self.note(&format!(
            "Exact-start restore for checkpoint {} ({} files)",
            checkpoint.id,
            snapshot.files.len()
        ));
        restore_snapshot_files(&snapshot, &mut result);

        self.finalize(&checkpoint, &mut result)?;
        Ok(result)
    }

    /// Compare current file contents to the checkpoint's snapshot.
    ///
    /// Read-only; differences are listed in path order.
    pub fn verify_recovery(&self, checkpoint_id: &str) -> Result<VerifyReport> {
        let Some(checkpoint) = self.store.checkpoint(checkpoint_id)? else {
            return Ok(VerifyReport {
                valid: false,
                differences: vec![format!("Checkpoint not found: {checkpoint_id}")],
            });
        };
        let Some(snapshot) = self.store.snapshot(&checkpoint.snapshot_id)? else {
            return Ok(VerifyReport {
                valid: false,
                differences: vec![SNAPSHOT_NOT_FOUND.to_string()],
            });
        };
        let differences = snapshot_differences(&snapshot.files);
        Ok(VerifyReport {
            valid: differences.is_empty(),
            differences,
        })
    }

    /// Recover the most recent incomplete checkpoint back to its snapshot.
    ///
    /// `None` when nothing needs recovery.
    pub fn auto_recover(&self) -> Result<Option<RecoveryResult>> {
        let Some(checkpoint) = self.store.last_incomplete_checkpoint()? else {
            debug!("no incomplete checkpoint, nothing to recover");
            return Ok(None);
        };
        info!(checkpoint = %checkpoint.id, "auto-recovering incomplete checkpoint");
        let options = RecoveryOptions {
            target_checkpoint_id: Some(checkpoint.id),
            restore_to_start: true,
            ..RecoveryOptions::default()
        };
        self.recover(&options).map(Some)
    }

    pub fn recovery_log(&self) -> Result<Vec<String>> {
        self.activity.lines()
    }

    pub fn clear_recovery_log(&self) -> Result<()> {
        self.activity.clear()
    }

    fn select(&self, target: Option<&str>) -> Result<Result<Checkpoint, String>> {
        let found = match target {
            Some(id) => self
                .store
                .checkpoint(id)?
                .ok_or_else(|| format!("Checkpoint not found: {id}")),
            None => self
                .store
                .last_checkpoint()?
                .ok_or_else(|| NO_CHECKPOINT.to_string()),
        };
        Ok(found)
    }

    fn finalize(&self, checkpoint: &Checkpoint, result: &mut RecoveryResult) -> Result<()> {
        result.enter(RecoveryPhase::Finalizing);
        self.store
            .finalize_checkpoint_by_id(&checkpoint.id, CheckpointStatus::RolledBack)?;
        result.finalized = true;
        result.finish();

        for target in &result.restored_files {
            self.note(&format!("Restored: {target}"));
        }
        for target in &result.rolled_back_files {
            self.note(&format!("Rolled back: {target}"));
        }
        for target in &result.skipped {
            self.note(&format!("Skipped: {target}"));
        }
        for error in &result.errors {
            self.note(&format!("Error: {error}"));
        }
        self.note(&format!(
            "Recovery {} for checkpoint {}: {} restored, {} rolled back, {} errors",
            if result.success { "completed" } else { "incomplete" },
            checkpoint.id,
            result.restored_files.len(),
            result.rolled_back_files.len(),
            result.errors.len()
        ));
        info!(
            checkpoint = %checkpoint.id,
            restored = result.restored_files.len(),
            rolled_back = result.rolled_back_files.len(),
            errors = result.errors.len(),
            "recovery finished"
        );
        Ok(())
    }

    /// Append to the activity log. The log is informational, so a failed
    /// write never fails the run.
    fn note(&self, line: &str) {
        if let Err(err) = self.activity.record(line) {
            warn!(error = %format!("{err:#}"), "activity log write failed");
        }
    }
}

/// Undo one entry. Safe to repeat.
pub fn undo_entry(entry: &WalEntry) -> Result<RestoreOutcome, RestoreError> {
    let target = Path::new(&entry.target);
    let io_error = |source: io::Error| RestoreError::Io {
        target: entry.target.clone(),
        source,
    };
    match undo_for(entry) {
        Undo::RemoveFile => match fs::remove_file(target) {
            Ok(()) => Ok(RestoreOutcome::RolledBack(entry.target.clone())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(RestoreOutcome::Unchanged),
            Err(err) => Err(io_error(err)),
        },
        Undo::WriteContent { content } | Undo::RecreateFile { content } => {
            write_content(target, content).map_err(io_error)?;
            Ok(RestoreOutcome::Restored(entry.target.clone()))
        }
        Undo::RemoveDir => match fs::remove_dir(target) {
            Ok(()) => Ok(RestoreOutcome::RolledBack(entry.target.clone())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(RestoreOutcome::Unchanged),
            Err(err) if err.kind() == io::ErrorKind::DirectoryNotEmpty => {
                Err(RestoreError::DirectoryNotEmpty {
                    target: entry.target.clone(),
                })
            }
            Err(err) => Err(io_error(err)),
        },
        Undo::RecreateDir => {
            fs::create_dir_all(target).map_err(io_error)?;
            Ok(RestoreOutcome::Restored(entry.target.clone()))
        }
        Undo::Ignore => Ok(RestoreOutcome::Skipped(entry.target.clone())),
        Undo::MissingPreviousState => Err(RestoreError::MissingPreviousState {
            target: entry.target.clone(),
            action: entry.action(),
        }),
    }
}

fn write_content(target: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(target, content)
}

fn restore_snapshot_files(snapshot: &StateSnapshot, result: &mut RecoveryResult) {
    for (path, content) in &snapshot.files {
        let outcome = write_content(Path::new(path), content)
            .map(|()| RestoreOutcome::Restored(path.clone()))
            .map_err(|source| RestoreError::Io {
                target: path.clone(),
                source,
            });
        result.absorb(outcome);
    }
}

fn snapshot_differences(files: &BTreeMap<String, String>) -> Vec<String> {
    let mut differences = Vec::new();
    for (path, expected) in files {
        match fs::read_to_string(path) {
            Ok(actual) if actual == *expected => {}
            Ok(_) => differences.push(format!("Modified: {path}")),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                differences.push(format!("Missing: {path}"));
            }
            Err(err) => differences.push(format!("Error reading {path}: {err}")),
        }
    }
    differences
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::types::{FileState, Mutation};
    use crate::io::action_log::ActionLog;
    use crate::io::config::RetryConfig;
    use crate::io::layout::{RewindPaths, init_layout};
    use crate::io::safe_parser::SafeParser;
    use crate::retry::{BackoffPolicy, NoRetry};
    use crate::test_support::{create, delete, encode_line, entry, modify, now_ms, write_lines};

    struct Fixture {
        temp: tempfile::TempDir,
        paths: RewindPaths,
        store: CheckpointStore,
        manager: RecoveryManager,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let paths = RewindPaths::new(temp.path().join(".rewind"));
            init_layout(&paths).expect("layout");
            let store = CheckpointStore::new(&paths, SafeParser::default());
            let manager =
                RecoveryManager::new(store.clone(), ActivityLog::new(&paths.recovery_log_path));
            Self {
                temp,
                paths,
                store,
                manager,
            }
        }

        fn file(&self, name: &str) -> String {
            self.temp.path().join(name).to_string_lossy().into_owned()
        }

        fn write(&self, name: &str, content: &str) {
            fs::write(self.file(name), content).expect("write");
        }

        fn read(&self, name: &str) -> String {
            fs::read_to_string(self.file(name)).expect("read")
        }

        fn log(&self, lines: &[String]) {
            write_lines(&self.paths.wal_path, lines);
        }
    }

    #[test]
    fn no_checkpoint_is_a_terminal_failure_without_side_effects() {
        let fx = Fixture::new();
        let result = fx
            .manager
            .recover(&RecoveryOptions::default())
            .expect("recover");
        assert!(!result.success);
        assert_eq!(result.phase, RecoveryPhase::Failed);
        assert_eq!(result.errors, vec![NO_CHECKPOINT.to_string()]);
        assert!(fx.manager.recovery_log().expect("log").is_empty());
    }

    #[test]
    fn unknown_target_checkpoint_is_reported() {
        let fx = Fixture::new();
        let options = RecoveryOptions {
            target_checkpoint_id: Some("cp-nope".to_string()),
            ..RecoveryOptions::default()
        };
        let result = fx.manager.recover(&options).expect("recover");
        assert_eq!(result.errors, vec!["Checkpoint not found: cp-nope".to_string()]);
    }

    #[test]
    fn missing_snapshot_is_a_terminal_failure() {
        let fx = Fixture::new();
        let checkpoint = fx.store.begin_checkpoint("t", &[]).expect("begin");
        fs::remove_file(fx.paths.snapshot_path(&checkpoint.snapshot_id)).expect("remove snapshot");

        let result = fx
            .manager
            .recover(&RecoveryOptions::default())
            .expect("recover");
        assert_eq!(result.errors, vec![SNAPSHOT_NOT_FOUND.to_string()]);
        assert_eq!(
            fx.store
                .checkpoint(&checkpoint.id)
                .expect("lookup")
                .map(|c| c.status),
            Some(CheckpointStatus::Active)
        );
    }

    #[test]
    fn modifications_are_undone_newest_first() {
        let fx = Fixture::new();
        let checkpoint = fx.store.begin_checkpoint("t", &[]).expect("begin");
        let target = fx.file("a.txt");
        fx.write("a.txt", "C");
        let now = now_ms();
        fx.log(&[
            encode_line(&entry(&checkpoint.id, "e1", now - 2_000, &target, modify("A", "B"))),
            encode_line(&entry(&checkpoint.id, "e2", now - 1_000, &target, modify("B", "C"))),
        ]);

        let result = fx
            .manager
            .recover(&RecoveryOptions::default())
            .expect("recover");
        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(fx.read("a.txt"), "A");
        assert_eq!(result.restored_files, vec![target]);
    }

    #[test]
    fn created_files_are_removed_and_deleted_files_recreated() {
        let fx = Fixture::new();
        let checkpoint = fx.store.begin_checkpoint("t", &[]).expect("begin");
        let created = fx.file("new.txt");
        let deleted = fx.file("nested/old.txt");
        fx.write("new.txt", "fresh");
        let now = now_ms();
        fx.log(&[
            encode_line(&entry(&checkpoint.id, "c", now - 2_000, &created, create("fresh"))),
            encode_line(&entry(&checkpoint.id, "d", now - 1_000, &deleted, delete("history"))),
        ]);

        let result = fx
            .manager
            .recover(&RecoveryOptions::default())
            .expect("recover");
        assert!(result.success);
        assert!(!Path::new(&created).exists());
        assert_eq!(result.rolled_back_files, vec![created]);
        assert_eq!(fs::read_to_string(&deleted).expect("recreated"), "history");
        assert_eq!(result.restored_files, vec![deleted]);
    }

    #[test]
    fn dry_run_plans_without_touching_anything() {
        let fx = Fixture::new();
        let checkpoint = fx.store.begin_checkpoint("t", &[]).expect("begin");
        let target = fx.file("a.txt");
        fx.write("a.txt", "changed");
        fx.log(&[encode_line(&entry(
            &checkpoint.id,
            "e1",
            now_ms() - 500,
            &target,
            modify("original", "changed"),
        ))]);

        let options = RecoveryOptions {
            dry_run: true,
            ..RecoveryOptions::default()
        };
        let result = fx.manager.recover(&options).expect("recover");
        assert!(result.success);
        assert!(result.dry_run);
        assert_eq!(
            result.planned,
            vec![PlannedRestore {
                target,
                action: ActionKind::FileModify,
            }]
        );
        assert_eq!(fx.read("a.txt"), "changed");
        assert!(fx.manager.needs_recovery().expect("needs"));
        assert!(fx.manager.recovery_log().expect("log").is_empty());
    }

    #[test]
    fn dry_run_plan_follows_restore_to_start() {
        let fx = Fixture::new();
        fx.write("a.txt", "original");
        let tracked = fx.file("a.txt");
        let checkpoint = fx
            .store
            .begin_checkpoint("t", &[PathBuf::from(&tracked)])
            .expect("begin");
        let other = fx.file("b.txt");
        fx.write("b.txt", "new");
        fx.log(&[
            encode_line(&entry(
                &checkpoint.id,
                "a",
                now_ms() - 500,
                &tracked,
                modify("original", "changed"),
            )),
            encode_line(&entry(
                &checkpoint.id,
                "b",
                now_ms() - 400,
                &other,
                modify("old", "new"),
            )),
        ]);
        fx.write("a.txt", "changed");

        let options = RecoveryOptions {
            dry_run: true,
            restore_to_start: true,
            ..RecoveryOptions::default()
        };
        let result = fx.manager.recover(&options).expect("recover");
        assert!(result.success);
        assert_eq!(
            result.planned,
            vec![
                PlannedRestore {
                    target: other,
                    action: ActionKind::FileModify,
                },
                PlannedRestore {
                    target: tracked,
                    action: ActionKind::FileModify,
                },
            ]
        );
        assert_eq!(fx.read("a.txt"), "changed");
        assert_eq!(fx.read("b.txt"), "new");
    }

    #[test]
    fn per_entry_failures_do_not_stop_the_run() {
        let fx = Fixture::new();
        let checkpoint = fx.store.begin_checkpoint("t", &[]).expect("begin");
        let dir = fx.file("build");
        fs::create_dir(&dir).expect("mkdir");
        fx.write("build/out.o", "bin");
        let target = fx.file("a.txt");
        fx.write("a.txt", "new");
        let missing_prev = fx.file("b.txt");
        let now = now_ms();
        fx.log(&[
            encode_line(&entry(&checkpoint.id, "m", now - 3_000, &target, modify("old", "new"))),
            encode_line(&entry(&checkpoint.id, "d", now - 2_000, &dir, Mutation::DirCreate)),
            encode_line(&entry(
                &checkpoint.id,
                "x",
                now - 1_000,
                &missing_prev,
                Mutation::FileDelete {
                    previous_state: None,
                },
            )),
        ]);

        let result = fx
            .manager
            .recover(&RecoveryOptions::default())
            .expect("recover");
        assert!(!result.success);
        assert_eq!(result.phase, RecoveryPhase::Failed);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains("no previous state"));
        assert!(result.errors[1].contains("directory is not empty"));
        assert_eq!(fx.read("a.txt"), "old");
        assert_eq!(
            fx.store
                .checkpoint(&checkpoint.id)
                .expect("lookup")
                .map(|c| c.status),
            Some(CheckpointStatus::RolledBack)
        );
    }

    #[test]
    fn metadata_is_skipped_and_directories_are_recreated() {
        let fx = Fixture::new();
        let checkpoint = fx.store.begin_checkpoint("t", &[]).expect("begin");
        let meta = fx.file("a.txt");
        let dir = fx.file("gone");
        let now = now_ms();
        fx.log(&[
            encode_line(&entry(
                &checkpoint.id,
                "meta",
                now - 2_000,
                &meta,
                Mutation::MetadataUpdate {
                    previous_state: Some(FileState::new("mode=644")),
                    new_state: Some(FileState::new("mode=755")),
                },
            )),
            encode_line(&entry(&checkpoint.id, "rd", now - 1_000, &dir, Mutation::DirDelete)),
        ]);

        let result = fx
            .manager
            .recover(&RecoveryOptions::default())
            .expect("recover");
        assert!(result.success);
        assert_eq!(result.skipped, vec![meta]);
        assert!(Path::new(&dir).is_dir());
        assert_eq!(result.restored_files, vec![dir]);
    }

    #[test]
    fn tracked_metadata_change_is_skipped() {
        let fx = Fixture::new();
        let checkpoint = fx.store.begin_checkpoint("t", &[]).expect("begin");
        let target = fx.file("run.sh");
        fx.write("run.sh", "echo hi");
        let log = ActionLog::new(&fx.paths.wal_path);
        log.tracker(&checkpoint.id)
            .record_metadata(Path::new(&target), Some("mode=644"), Some("mode=755"))
            .expect("record");

        let result = fx
            .manager
            .recover(&RecoveryOptions::default())
            .expect("recover");
        assert!(result.success);
        assert_eq!(result.skipped, vec![target]);
        assert_eq!(fx.read("run.sh"), "echo hi");
    }

    #[test]
    fn tracked_directories_round_trip_to_pre_task_state() {
        let fx = Fixture::new();
        let checkpoint = fx.store.begin_checkpoint("t", &[]).expect("begin");
        let keep = fx.file("keep");
        fs::create_dir(&keep).expect("mkdir");
        let log = ActionLog::new(&fx.paths.wal_path);
        let tracker = log.tracker(&checkpoint.id);
        tracker.create_dir(Path::new(&keep)).expect("existing dir");
        tracker
            .write_file(&fx.temp.path().join("gen/deep/x.rs"), "fn main() {}")
            .expect("nested write");
        tracker
            .create_dir(&fx.temp.path().join("out/bin"))
            .expect("nested dir");

        let result = fx
            .manager
            .recover(&RecoveryOptions::default())
            .expect("recover");
        assert!(result.success, "errors: {:?}", result.errors);
        assert!(Path::new(&keep).is_dir());
        assert!(!fx.temp.path().join("gen").exists());
        assert!(!fx.temp.path().join("out").exists());
        assert!(!result.rolled_back_files.contains(&keep));
    }

    #[test]
    fn activity_log_failure_does_not_fail_recovery() {
        let fx = Fixture::new();
        fx.write("a.txt", "original");
        let target = fx.file("a.txt");
        let checkpoint = fx
            .store
            .begin_checkpoint("t", &[PathBuf::from(&target)])
            .expect("begin");
        fx.log(&[encode_line(&entry(
            &checkpoint.id,
            "e1",
            now_ms(),
            &target,
            modify("original", "changed"),
        ))]);
        fx.write("a.txt", "changed");
        fs::create_dir(&fx.paths.recovery_log_path).expect("occupy log path");

        let result = fx
            .manager
            .recover(&RecoveryOptions::default())
            .expect("recover");
        assert!(result.success, "errors: {:?}", result.errors);
        assert!(result.finalized);
        assert_eq!(fx.read("a.txt"), "original");
        assert_eq!(
            fx.store.checkpoint(&checkpoint.id).expect("lookup").map(|c| c.status),
            Some(CheckpointStatus::RolledBack)
        );
    }

    #[test]
    fn terminal_checkpoint_needs_force() {
        let fx = Fixture::new();
        let checkpoint = fx.store.begin_checkpoint("t", &[]).expect("begin");
        fx.store
            .finalize_checkpoint(CheckpointStatus::Committed)
            .expect("commit");

        let refused = fx
            .manager
            .recover(&RecoveryOptions::default())
            .expect("recover");
        assert!(!refused.success);
        assert_eq!(
            refused.errors,
            vec![format!("Checkpoint {} is already committed", checkpoint.id)]
        );

        let forced = fx
            .manager
            .recover(&RecoveryOptions {
                force: true,
                ..RecoveryOptions::default()
            })
            .expect("recover");
        assert!(forced.success);
    }

    #[test]
    fn restore_to_start_uses_snapshot_and_replays_the_rest() {
        let fx = Fixture::new();
        fx.write("a.txt", "original");
        let tracked = fx.file("a.txt");
        let checkpoint = fx
            .store
            .begin_checkpoint("t", &[PathBuf::from(&tracked)])
            .expect("begin");
        let log = ActionLog::new(&fx.paths.wal_path);
        let tracker = log.tracker(&checkpoint.id);
        tracker
            .write_file(Path::new(&tracked), "changed")
            .expect("modify");
        let extra = fx.file("extra.txt");
        tracker.write_file(Path::new(&extra), "new").expect("create");

        let result = fx
            .manager
            .recover(&RecoveryOptions {
                restore_to_start: true,
                ..RecoveryOptions::default()
            })
            .expect("recover");
        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(fx.read("a.txt"), "original");
        assert!(!Path::new(&extra).exists());
        assert_eq!(result.restored_files, vec![tracked]);
        assert_eq!(result.rolled_back_files, vec![extra]);
    }

    #[test]
    fn exact_start_ignores_entries() {
        let fx = Fixture::new();
        fx.write("a.txt", "original");
        let tracked = fx.file("a.txt");
        let checkpoint = fx
            .store
            .begin_checkpoint("t", &[PathBuf::from(&tracked)])
            .expect("begin");
        fx.write("a.txt", "scribbled");
        let created = fx.file("left.txt");
        fx.write("left.txt", "stays");
        fx.log(&[encode_line(&entry(
            &checkpoint.id,
            "c",
            now_ms(),
            &created,
            create("stays"),
        ))]);

        let result = fx.manager.restore_to_exact_start(None).expect("restore");
        assert!(result.success);
        assert_eq!(fx.read("a.txt"), "original");
        assert!(Path::new(&created).exists());
        assert!(!fx.manager.needs_recovery().expect("needs"));
    }

    #[test]
    fn verify_is_deterministic_and_read_only() {
        let fx = Fixture::new();
        fx.write("a.txt", "A");
        fx.write("b.txt", "B");
        let checkpoint = fx
            .store
            .begin_checkpoint("t", &[PathBuf::from(fx.file("b.txt")), PathBuf::from(fx.file("a.txt"))])
            .expect("begin");
        fx.write("a.txt", "changed");
        fs::remove_file(fx.file("b.txt")).expect("remove");

        let first = fx.manager.verify_recovery(&checkpoint.id).expect("verify");
        let second = fx.manager.verify_recovery(&checkpoint.id).expect("verify");
        assert_eq!(first, second);
        assert!(!first.valid);
        assert_eq!(
            first.differences,
            vec![
                format!("Modified: {}", fx.file("a.txt")),
                format!("Missing: {}", fx.file("b.txt")),
            ]
        );

        let unknown = fx.manager.verify_recovery("cp-x").expect("verify");
        assert_eq!(unknown.differences, vec!["Checkpoint not found: cp-x".to_string()]);
    }

    #[test]
    fn end_to_end_modify_recover_verify() {
        let fx = Fixture::new();
        fx.write("a.txt", "original");
        let target = fx.file("a.txt");
        let c1 = fx
            .store
            .begin_checkpoint("task", &[PathBuf::from(&target)])
            .expect("begin");
        fx.log(&[encode_line(&entry(
            &c1.id,
            "e1",
            now_ms(),
            &target,
            modify("original", "changed"),
        ))]);
        fx.write("a.txt", "changed");

        let result = fx
            .manager
            .recover(&RecoveryOptions::default())
            .expect("recover");
        assert!(result.success);
        assert_eq!(fx.read("a.txt"), "original");
        assert_eq!(
            fx.store.checkpoint(&c1.id).expect("lookup").map(|c| c.status),
            Some(CheckpointStatus::RolledBack)
        );
        let report = fx.manager.verify_recovery(&c1.id).expect("verify");
        assert!(report.valid);
        assert!(report.differences.is_empty());

        let log = fx.manager.recovery_log().expect("log");
        assert!(log.iter().any(|line| line.contains("Restored: ")));
        fx.manager.clear_recovery_log().expect("clear");
        assert!(fx.manager.recovery_log().expect("log").is_empty());
    }

    #[test]
    fn auto_recover_targets_latest_incomplete_checkpoint() {
        let fx = Fixture::new();
        assert_eq!(fx.manager.auto_recover().expect("auto"), None);

        fx.write("a.txt", "original");
        let checkpoint = fx
            .store
            .begin_checkpoint("t", &[PathBuf::from(fx.file("a.txt"))])
            .expect("begin");
        fx.write("a.txt", "half-written");

        let result = fx
            .manager
            .auto_recover()
            .expect("auto")
            .expect("ran recovery");
        assert!(result.success);
        assert_eq!(result.checkpoint_id, Some(checkpoint.id));
        assert_eq!(fx.read("a.txt"), "original");
        assert!(!fx.manager.needs_recovery().expect("needs"));
    }

    #[test]
    fn retry_wraps_the_whole_run() {
        let fx = Fixture::new();
        fx.store.begin_checkpoint("t", &[]).expect("begin");
        let policy = BackoffPolicy::new(RetryConfig {
            max_attempts: 2,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1.0,
            jitter: false,
        });
        let result = fx
            .manager
            .recover_with_retry(&policy, &RecoveryOptions::default())
            .expect("recover");
        assert!(result.success);

        let again = fx
            .manager
            .recover_with_retry(&NoRetry, &RecoveryOptions::default())
            .expect("recover");
        assert!(!again.success);
    }
}
