//! Write-ahead log and crash-consistent recovery for agent-driven edits.
//!
//! An orchestrator opens a checkpoint before each task, routes every file
//! mutation through a [`io::action_log::FileTracker`] (which logs the change
//! before making it), and commits the checkpoint when the task succeeds. If
//! the process dies mid-task, [`recovery::RecoveryManager`] undoes the logged
//! mutations newest-first, or restores the snapshot taken at checkpoint start.
//!
//! - **[`core`]**: Pure logic (record types, frame codec, checksums, undo
//!   planning). No I/O.
//! - **[`io`]**: Filesystem stores (log, checkpoints, snapshots, state
//!   records, config, lock).
//!
//! [`engine::Engine`] wires the stores for one working directory;
//! [`recovery`] and [`retry`] implement the recovery run.

pub mod clock;
pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod recovery;
pub mod retry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
