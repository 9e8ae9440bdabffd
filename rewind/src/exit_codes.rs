//! Stable exit codes for `rewind` CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, failed lookup, or any other error.
pub const INVALID: i32 = 1;
/// `rewind status` found an active checkpoint left behind by an interrupted task.
pub const NEEDS_RECOVERY: i32 = 2;
/// Recovery finished with per-file errors, verification found differences,
/// or the log contains corrupted frames.
pub const INCOMPLETE: i32 = 3;
