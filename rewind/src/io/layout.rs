//! Canonical paths inside an engine working directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

/// Default working directory name, relative to the project root.
pub const DEFAULT_DIR: &str = ".rewind";

/// All canonical paths within a working directory.
#[derive(Debug, Clone)]
pub struct RewindPaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub checkpoints_path: PathBuf,
    pub snapshots_dir: PathBuf,
    pub wal_path: PathBuf,
    pub wal_backup_path: PathBuf,
    pub recovery_log_path: PathBuf,
    pub states_dir: PathBuf,
    pub lock_path: PathBuf,
}

impl RewindPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_path: root.join("config.toml"),
            checkpoints_path: root.join("checkpoints.json"),
            snapshots_dir: root.join("snapshots"),
            wal_path: root.join("wal.log"),
            wal_backup_path: root.join("wal.log.backup"),
            recovery_log_path: root.join("recovery.log"),
            states_dir: root.join("states"),
            lock_path: root.join("rewind.lock"),
            root,
        }
    }

    pub fn snapshot_path(&self, snapshot_id: &str) -> PathBuf {
        self.snapshots_dir.join(format!("{snapshot_id}.json"))
    }
}

/// Create the working directory and its subdirectories if missing.
pub fn init_layout(paths: &RewindPaths) -> Result<()> {
    if paths.root.exists() && !paths.root.is_dir() {
        return Err(anyhow!(
            "working directory {} exists but is not a directory",
            paths.root.display()
        ));
    }
    create_dir(&paths.root)?;
    create_dir(&paths.snapshots_dir)?;
    create_dir(&paths.states_dir)?;
    Ok(())
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}
