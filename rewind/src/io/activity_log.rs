//! Human-readable recovery activity log (`recovery.log`).
//!
//! This is a product artifact for operators, written regardless of
//! `RUST_LOG`. Development diagnostics go through `tracing` instead.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::atomic::append_line;
use crate::clock::now_rfc3339;

#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a timestamped line.
    pub fn record(&self, message: &str) -> Result<()> {
        append_line(&self.path, &format!("[{}] {}", now_rfc3339(), message))
    }

    /// All lines, oldest first. Missing log reads as empty.
    pub fn lines(&self) -> Result<Vec<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents.lines().map(str::to_string).collect()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => {
                Err(err).with_context(|| format!("read recovery log {}", self.path.display()))
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("clear recovery log {}", self.path.display()))
            }
        }
    }
}
