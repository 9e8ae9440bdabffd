//! Append-only file-action log (`wal.log`) and the tracker that writes it.
//!
//! Every mutation is logged before it is applied, with the content it is about
//! to replace. If the process dies between the two, undoing the entry is still
//! safe: deleting a file that was never created or restoring content that was
//! never overwritten are both no-ops in effect.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::atomic::append_line;
use crate::clock::now_ms;
use crate::core::frame::encode_entry;
use crate::core::types::{EntryStatus, FileState, Mutation, WalEntry};

/// Handle to the file-action log.
#[derive(Debug, Clone)]
pub struct ActionLog {
    path: PathBuf,
}

impl ActionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and sync it to disk.
    pub fn append(&self, entry: &WalEntry) -> Result<()> {
        let line = encode_entry(entry)?;
        append_line(&self.path, &line)
            .with_context(|| format!("append wal entry {} for {}", entry.id, entry.target))?;
        debug!(id = %entry.id, action = %entry.action(), path = %entry.target, "wal entry appended");
        Ok(())
    }

    /// Start tracking mutations for a checkpoint.
    pub fn tracker(&self, checkpoint_id: impl Into<String>) -> FileTracker<'_> {
        FileTracker {
            log: self,
            checkpoint_id: checkpoint_id.into(),
        }
    }
}

/// Performs filesystem mutations on behalf of an agent, logging each one
/// write-ahead under a single checkpoint.
#[derive(Debug)]
pub struct FileTracker<'a> {
    log: &'a ActionLog,
    checkpoint_id: String,
}

impl FileTracker<'_> {
    /// Write `content` to `target`, logging a create or a modify.
    ///
    /// Missing parent directories are created and logged first.
    #[instrument(skip_all, fields(path = %target.display()))]
    pub fn write_file(&self, target: &Path, content: &str) -> Result<WalEntry> {
        if let Some(parent) = target.parent() {
            self.create_missing_dirs(parent)?;
        }
        let mutation = match read_existing(target)? {
            Some(previous) => Mutation::FileModify {
                previous_state: Some(FileState::new(previous)),
                new_state: Some(FileState::new(content)),
            },
            None => Mutation::FileCreate {
                new_state: Some(FileState::new(content)),
            },
        };
        let entry = self.log_ahead(target, mutation)?;
        fs::write(target, content).with_context(|| format!("write {}", target.display()))?;
        Ok(entry)
    }

    /// Delete `target`, logging its content so the delete can be undone.
    #[instrument(skip_all, fields(path = %target.display()))]
    pub fn delete_file(&self, target: &Path) -> Result<WalEntry> {
        let previous = fs::read_to_string(target)
            .with_context(|| format!("read {} before delete", target.display()))?;
        let entry = self.log_ahead(
            target,
            Mutation::FileDelete {
                previous_state: Some(FileState::new(previous)),
            },
        )?;
        fs::remove_file(target).with_context(|| format!("delete {}", target.display()))?;
        Ok(entry)
    }

    /// Create a directory and any missing parents.
    ///
    /// Returns one entry per directory actually created, outermost first.
    /// An existing directory yields no entries.
    pub fn create_dir(&self, target: &Path) -> Result<Vec<WalEntry>> {
        self.create_missing_dirs(target)
    }

    /// Remove an empty directory, logging it.
    pub fn remove_dir(&self, target: &Path) -> Result<WalEntry> {
        let entry = self.log_ahead(target, Mutation::DirDelete)?;
        fs::remove_dir(target)
            .with_context(|| format!("remove directory {}", target.display()))?;
        Ok(entry)
    }

    /// Record a metadata change made elsewhere. Informational only.
    pub fn record_metadata(
        &self,
        target: &Path,
        previous: Option<&str>,
        new: Option<&str>,
    ) -> Result<WalEntry> {
        self.log_ahead(
            target,
            Mutation::MetadataUpdate {
                previous_state: previous.map(FileState::new),
                new_state: new.map(FileState::new),
            },
        )
    }

    fn create_missing_dirs(&self, dir: &Path) -> Result<Vec<WalEntry>> {
        let missing: Vec<&Path> = dir
            .ancestors()
            .take_while(|path| !path.as_os_str().is_empty() && !path.exists())
            .collect();
        let mut entries = Vec::with_capacity(missing.len());
        for path in missing.into_iter().rev() {
            entries.push(self.log_ahead(path, Mutation::DirCreate)?);
            fs::create_dir(path)
                .with_context(|| format!("create directory {}", path.display()))?;
        }
        Ok(entries)
    }

    fn log_ahead(&self, target: &Path, mutation: Mutation) -> Result<WalEntry> {
        let entry = WalEntry {
            id: Uuid::new_v4().to_string(),
            checkpoint_id: self.checkpoint_id.clone(),
            timestamp: now_ms(),
            mutation,
            target: target.to_string_lossy().into_owned(),
            status: EntryStatus::Pending,
        };
        self.log.append(&entry)?;
        Ok(entry)
    }
}

fn read_existing(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}
