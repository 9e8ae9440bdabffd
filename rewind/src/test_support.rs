//! Test-only helpers for building log entries and throwaway workspaces.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::core::frame::encode_entry;
use crate::core::types::{EntryStatus, FileState, Mutation, WalEntry};
use crate::engine::Engine;

pub use crate::clock::now_ms;

/// Applied entry with explicit identity, time and target.
pub fn entry(
    checkpoint_id: &str,
    id: &str,
    timestamp: i64,
    target: &str,
    mutation: Mutation,
) -> WalEntry {
    WalEntry {
        id: id.to_string(),
        checkpoint_id: checkpoint_id.to_string(),
        timestamp,
        mutation,
        target: target.to_string(),
        status: EntryStatus::Applied,
    }
}

pub fn create(new: &str) -> Mutation {
    Mutation::FileCreate {
        new_state: Some(FileState::new(new)),
    }
}

pub fn modify(previous: &str, new: &str) -> Mutation {
    Mutation::FileModify {
        previous_state: Some(FileState::new(previous)),
        new_state: Some(FileState::new(new)),
    }
}

pub fn delete(previous: &str) -> Mutation {
    Mutation::FileDelete {
        previous_state: Some(FileState::new(previous)),
    }
}

pub fn encode_line(entry: &WalEntry) -> String {
    encode_entry(entry).expect("encode entry")
}

/// Write `lines` newline-terminated, replacing any existing file.
pub fn write_lines(path: &Path, lines: &[String]) {
    let mut contents = lines.join("\n");
    contents.push('\n');
    fs::write(path, contents).expect("write lines");
}

/// Temporary project directory with an engine at `<project>/.rewind`.
pub struct TestWorkspace {
    temp: TempDir,
    pub engine: Engine,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let engine = Engine::open(temp.path().join(".rewind")).expect("open engine");
        Self { temp, engine }
    }

    /// Absolute path of a project file.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.temp.path().join(rel)
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write project file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).expect("read project file")
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
