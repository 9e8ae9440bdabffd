//! Advisory lock serializing engine use per working directory.
//!
//! The engine itself never locks. Callers that might race (two orchestrators
//! on one project, a CLI next to a running workflow) hold this lock around
//! recovery and other mutating calls.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use fs2::FileExt;
use tracing::debug;

/// Exclusive lock on `<dir>/rewind.lock`, released on drop.
///
/// The lock file itself is left in place. Unlinking it would let a waiter
/// hold a lock on a file that a later process no longer opens.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    path: PathBuf,
}

impl WorkspaceLock {
    /// Try to take the lock without blocking.
    pub fn try_acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("open lock file {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                file.set_len(0)
                    .with_context(|| format!("truncate lock file {}", path.display()))?;
                writeln!(file, "{}", std::process::id())
                    .with_context(|| format!("write lock file {}", path.display()))?;
                debug!(path = %path.display(), "workspace lock acquired");
                Ok(Self {
                    file,
                    path: path.to_path_buf(),
                })
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Err(anyhow!(
                "workspace is locked by another process ({})",
                path.display()
            )),
            Err(err) => {
                Err(err).with_context(|| format!("lock workspace {}", path.display()))
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(err) = fs2::FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %err, "workspace lock release failed");
        }
    }
}
