//! Engine configuration stored under `<dir>/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::frame::TimestampWindow;

/// Engine configuration (TOML).
///
/// Meant to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RewindConfig {
    /// Generic state records kept after pruning (newest win).
    pub max_state_records: usize,

    pub corruption: CorruptionConfig,

    pub retry: RetryConfig,
}

/// Bounds used by the safe parser when classifying log lines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorruptionConfig {
    /// Entries older than this are rejected as implausible.
    pub max_age_secs: u64,
    /// Entries further than this in the future are rejected (clock skew).
    pub max_future_secs: u64,
    /// Characters of a rejected line kept in the corruption report.
    pub preview_chars: usize,
}

/// Whole-operation retry around recovery runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RewindConfig {
    fn default() -> Self {
        Self {
            max_state_records: 50,
            corruption: CorruptionConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for CorruptionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 365 * 24 * 60 * 60,
            max_future_secs: 60,
            preview_chars: 100,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl CorruptionConfig {
    pub fn window(&self) -> TimestampWindow {
        TimestampWindow::new(
            Duration::from_secs(self.max_age_secs),
            Duration::from_secs(self.max_future_secs),
        )
    }
}

impl RewindConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_state_records == 0 {
            return Err(anyhow!("max_state_records must be > 0"));
        }
        if self.corruption.preview_chars == 0 {
            return Err(anyhow!("corruption.preview_chars must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier <= 0.0 {
            return Err(anyhow!("retry.multiplier must be > 0"));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(anyhow!(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms"
            ));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RewindConfig::default()`.
pub fn load_config(path: &Path) -> Result<RewindConfig> {
    if !path.exists() {
        let cfg = RewindConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RewindConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
