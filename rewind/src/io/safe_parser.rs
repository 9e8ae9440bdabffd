//! Defensive parsing and repair of the file-action log.
//!
//! A damaged line never aborts a parse: it is set aside as a
//! [`CorruptedFrame`] and parsing continues with the next line. Repair
//! rewrites the log with only the valid lines, after backing up the original.

use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::atomic::write_atomic;
use super::config::CorruptionConfig;
use crate::clock::now_ms;
use crate::core::frame::{FrameDecoder, FrameError, TimestampWindow};
use crate::core::types::{CorruptedFrame, WalEntry};

/// Default preview length for corrupted lines.
pub const DEFAULT_PREVIEW_CHARS: usize = 100;

/// Outcome of parsing a log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseReport {
    /// True if any frame is valid, or if nothing was corrupted.
    pub success: bool,
    pub frames: Vec<WalEntry>,
    pub corrupted_frames: Vec<CorruptedFrame>,
    /// Non-blank lines examined.
    pub total_lines: usize,
    pub valid_frames: usize,
}

impl ParseReport {
    fn empty() -> Self {
        Self {
            success: true,
            frames: Vec::new(),
            corrupted_frames: Vec::new(),
            total_lines: 0,
            valid_frames: 0,
        }
    }
}

/// Outcome of [`SafeParser::repair`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub success: bool,
    pub lines_removed: usize,
    /// Where the original log was preserved; `None` if no repair was needed.
    pub backup_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl RepairReport {
    fn clean() -> Self {
        Self {
            success: true,
            lines_removed: 0,
            backup_path: None,
            error: None,
        }
    }
}

struct ParsedLine<'a> {
    line_number: usize,
    raw: &'a str,
    outcome: Result<WalEntry, FrameError>,
}

/// Log parser with configurable plausibility bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeParser {
    window: TimestampWindow,
    preview_chars: usize,
}

impl Default for SafeParser {
    fn default() -> Self {
        Self {
            window: TimestampWindow::default(),
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

impl SafeParser {
    pub fn new(window: TimestampWindow, preview_chars: usize) -> Self {
        Self {
            window,
            preview_chars,
        }
    }

    pub fn from_config(cfg: &CorruptionConfig) -> Self {
        Self::new(cfg.window(), cfg.preview_chars)
    }

    pub fn window(&self) -> TimestampWindow {
        self.window
    }

    /// Parse the log at `path`. A missing file parses as an empty, healthy log.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn parse(&self, path: &Path) -> Result<ParseReport> {
        let Some(contents) = read_log(path)? else {
            debug!("wal missing, treating as empty");
            return Ok(ParseReport::empty());
        };
        self.parse_str(&contents, now_ms())
    }

    /// Parse log contents against an explicit "now".
    pub fn parse_str(&self, contents: &str, now_ms: i64) -> Result<ParseReport> {
        let decoder = FrameDecoder::new(self.window)?;
        let mut report = ParseReport::empty();
        for line in classify(&decoder, contents, now_ms) {
            report.total_lines += 1;
            match line.outcome {
                Ok(entry) => report.frames.push(entry),
                Err(err) => {
                    warn!(line = line.line_number, error = %err, "corrupted wal frame");
                    report.corrupted_frames.push(CorruptedFrame {
                        line_number: line.line_number,
                        raw_content: preview(line.raw, self.preview_chars),
                        parse_error: err.to_string(),
                    });
                }
            }
        }
        report.valid_frames = report.frames.len();
        report.success = report.valid_frames > 0 || report.corrupted_frames.is_empty();
        debug!(
            total = report.total_lines,
            valid = report.valid_frames,
            corrupted = report.corrupted_frames.len(),
            "wal parsed"
        );
        Ok(report)
    }

    /// Valid frame with the greatest timestamp (earliest in the log on ties).
    pub fn last_valid_state(&self, path: &Path) -> Result<Option<WalEntry>> {
        let report = self.parse(path)?;
        let mut best: Option<WalEntry> = None;
        for frame in report.frames {
            let newer = best
                .as_ref()
                .is_none_or(|current| frame.timestamp > current.timestamp);
            if newer {
                best = Some(frame);
            }
        }
        Ok(best)
    }

    /// Valid frames belonging to `checkpoint_id`, in log order.
    pub fn frames_for_checkpoint(&self, checkpoint_id: &str, path: &Path) -> Result<Vec<WalEntry>> {
        let report = self.parse(path)?;
        Ok(report
            .frames
            .into_iter()
            .filter(|frame| frame.checkpoint_id == checkpoint_id)
            .collect())
    }

    /// Drop corrupted lines from the log, keeping valid ones in order.
    ///
    /// The original is copied to `backup_path` (default `<log>.backup`) first;
    /// an existing backup is never overwritten. Nothing is rewritten unless the
    /// backup exists. Failures are reported in the result, not as `Err`.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn repair(&self, path: &Path, backup_path: Option<&Path>) -> Result<RepairReport> {
        let Some(contents) = read_log(path)? else {
            return Ok(RepairReport::clean());
        };
        let decoder = FrameDecoder::new(self.window)?;
        let parsed = classify(&decoder, &contents, now_ms());
        let removed = parsed.iter().filter(|line| line.outcome.is_err()).count();
        if removed == 0 {
            debug!("no corrupted frames, nothing to repair");
            return Ok(RepairReport::clean());
        }

        let backup = backup_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_backup_path(path));
        if let Err(err) = ensure_backup(path, &backup) {
            warn!(error = %format!("{err:#}"), "wal backup failed, log left untouched");
            return Ok(RepairReport {
                success: false,
                lines_removed: 0,
                backup_path: Some(backup),
                error: Some(format!("{err:#}")),
            });
        }

        let mut kept = String::new();
        for line in parsed.iter().filter(|line| line.outcome.is_ok()) {
            kept.push_str(line.raw);
            kept.push('\n');
        }
        if let Err(err) = write_atomic(path, &kept) {
            return Ok(RepairReport {
                success: false,
                lines_removed: 0,
                backup_path: Some(backup),
                error: Some(format!("{err:#}")),
            });
        }

        info!(removed, backup = %backup.display(), "wal repaired");
        Ok(RepairReport {
            success: true,
            lines_removed: removed,
            backup_path: Some(backup),
            error: None,
        })
    }
}

/// Parse a log with default bounds.
pub fn parse_safe_wal(path: &Path) -> Result<ParseReport> {
    SafeParser::default().parse(path)
}

/// Valid frame with the greatest timestamp, using default bounds.
pub fn get_last_valid_state(path: &Path) -> Result<Option<WalEntry>> {
    SafeParser::default().last_valid_state(path)
}

/// Valid frames of one checkpoint, using default bounds.
pub fn get_frames_for_checkpoint(checkpoint_id: &str, path: &Path) -> Result<Vec<WalEntry>> {
    SafeParser::default().frames_for_checkpoint(checkpoint_id, path)
}

/// Repair a log with default bounds.
pub fn recover_from_corrupted_wal(path: &Path, backup_path: Option<&Path>) -> Result<RepairReport> {
    SafeParser::default().repair(path, backup_path)
}

pub fn default_backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".backup");
    path.with_file_name(name)
}

fn classify<'a>(decoder: &FrameDecoder, contents: &'a str, now_ms: i64) -> Vec<ParsedLine<'a>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, raw)| !raw.trim().is_empty())
        .map(|(idx, raw)| ParsedLine {
            line_number: idx + 1,
            raw,
            outcome: decoder.decode(raw.trim(), now_ms),
        })
        .collect()
}

/// Read the log, tolerating invalid UTF-8 (it only spoils the affected line).
fn read_log(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(match String::from_utf8_lossy(&bytes) {
            Cow::Borrowed(text) => text.to_string(),
            Cow::Owned(text) => text,
        })),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read wal {}", path.display())),
    }
}

fn ensure_backup(path: &Path, backup: &Path) -> Result<()> {
    if backup.exists() {
        debug!(backup = %backup.display(), "backup already present, keeping it");
        return Ok(());
    }
    if let Some(parent) = backup.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create backup directory {}", parent.display()))?;
    }
    fs::copy(path, backup)
        .with_context(|| format!("back up {} to {}", path.display(), backup.display()))?;
    Ok(())
}

fn preview(raw: &str, limit: usize) -> String {
    if raw.chars().count() <= limit {
        return raw.to_string();
    }
    let mut cut: String = raw.chars().take(limit).collect();
    cut.push_str("...");
    cut
}
