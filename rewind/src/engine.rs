//! Engine object tying the stores together for one working directory.
//!
//! Construct one per workspace and pass it to the orchestrating workflow.
//! Nothing here is process-global.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde_json::Value;
use tracing::{debug, info};

use crate::core::types::{Checkpoint, CheckpointStatus};
use crate::io::action_log::{ActionLog, FileTracker};
use crate::io::activity_log::ActivityLog;
use crate::io::checkpoint_store::CheckpointStore;
use crate::io::config::{RewindConfig, load_config};
use crate::io::layout::{RewindPaths, init_layout};
use crate::io::safe_parser::{ParseReport, RepairReport, SafeParser};
use crate::io::state_store::StateStore;
use crate::recovery::RecoveryManager;
use crate::retry::BackoffPolicy;

#[derive(Debug, Clone)]
pub struct Engine {
    paths: RewindPaths,
    config: RewindConfig,
    parser: SafeParser,
    actions: ActionLog,
    checkpoints: CheckpointStore,
    states: StateStore,
    recovery: RecoveryManager,
}

impl Engine {
    /// Open (creating if needed) the working directory, reading
    /// `config.toml` when present.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let paths = RewindPaths::new(dir);
        init_layout(&paths)?;
        let config = load_config(&paths.config_path)?;
        Ok(Self::build(paths, config))
    }

    /// Open the working directory with an explicit configuration.
    pub fn with_config(dir: impl Into<PathBuf>, config: RewindConfig) -> Result<Self> {
        config.validate()?;
        let paths = RewindPaths::new(dir);
        init_layout(&paths)?;
        Ok(Self::build(paths, config))
    }

    fn build(paths: RewindPaths, config: RewindConfig) -> Self {
        let parser = SafeParser::from_config(&config.corruption);
        let checkpoints = CheckpointStore::new(&paths, parser);
        let recovery = RecoveryManager::new(
            checkpoints.clone(),
            ActivityLog::new(&paths.recovery_log_path),
        );
        debug!(root = %paths.root.display(), "engine opened");
        Self {
            actions: ActionLog::new(&paths.wal_path),
            states: StateStore::new(&paths.states_dir),
            parser,
            checkpoints,
            recovery,
            config,
            paths,
        }
    }

    pub fn paths(&self) -> &RewindPaths {
        &self.paths
    }

    pub fn config(&self) -> &RewindConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn states(&self) -> &StateStore {
        &self.states
    }

    pub fn actions(&self) -> &ActionLog {
        &self.actions
    }

    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }

    /// Retry policy built from `[retry]` in the config.
    pub fn retry_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.config.retry.clone())
    }

    /// Start a task: snapshot `files` and open a checkpoint for it.
    ///
    /// Refused while another checkpoint is still active; that one must be
    /// committed or recovered first.
    pub fn begin_task(&self, task_id: &str, files: &[PathBuf]) -> Result<Checkpoint> {
        if let Some(active) = self.checkpoints.last_incomplete_checkpoint()? {
            bail!(
                "checkpoint {} is still active; commit or recover it first",
                active.id
            );
        }
        self.checkpoints.begin_checkpoint(task_id, files)
    }

    /// Tracker logging mutations under `checkpoint_id`.
    pub fn tracker(&self, checkpoint_id: &str) -> FileTracker<'_> {
        self.actions.tracker(checkpoint_id)
    }

    pub fn active_checkpoint(&self) -> Result<Option<Checkpoint>> {
        self.checkpoints.last_incomplete_checkpoint()
    }

    /// Mark the active checkpoint committed: the task finished cleanly.
    pub fn commit_task(&self) -> Result<Checkpoint> {
        let checkpoint = self
            .checkpoints
            .finalize_checkpoint(CheckpointStatus::Committed)?;
        info!(checkpoint = %checkpoint.id, "task committed");
        Ok(checkpoint)
    }

    /// Append a generic state record, then prune to the retention limit.
    pub fn journal_state(&self, id: &str, data: Value) -> Result<String> {
        let name = self.states.append_log(id, data)?;
        self.states.prune_old_logs(self.config.max_state_records)?;
        Ok(name)
    }

    /// Parse the file-action log with the configured bounds.
    pub fn inspect_wal(&self) -> Result<ParseReport> {
        self.parser.parse(&self.paths.wal_path)
    }

    /// Drop corrupted lines from the file-action log, backing it up first.
    pub fn repair_wal(&self, backup_path: Option<&Path>) -> Result<RepairReport> {
        let backup = backup_path.unwrap_or(self.paths.wal_backup_path.as_path());
        self.parser.repair(&self.paths.wal_path, Some(backup))
    }
}
