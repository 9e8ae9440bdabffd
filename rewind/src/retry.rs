//! Whole-operation retry for recovery runs.
//!
//! Only hard errors (`Err`) are retried. Per-entry restoration failures are
//! part of a successful run's result and never trigger a retry.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::io::config::RetryConfig;

/// Strategy for re-running a fallible operation.
pub trait RetryPolicy {
    fn execute<T, F>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>;
}

/// Run once, never retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn execute<T, F>(&self, _operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        op()
    }
}

/// Exponential backoff with an optional 25% jitter, blocking between attempts.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: RetryConfig,
}

impl BackoffPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before retry number `attempt` (0 = first retry).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.config.initial_backoff_ms as f64 * self.config.multiplier.powi(exponent);
        let base = if scaled.is_finite() {
            (scaled as u64).min(self.config.max_backoff_ms)
        } else {
            self.config.max_backoff_ms
        };
        let delay = if self.config.jitter {
            base + (base as f64 * 0.25 * rand::random::<f64>()) as u64
        } else {
            base
        };
        Duration::from_millis(delay)
    }
}

impl RetryPolicy for BackoffPolicy {
    fn execute<T, F>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt < attempts => {
                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %format!("{err:#}"),
                        "operation failed, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    warn!(operation, attempts, "operation failed, giving up");
                    return Err(err.context(format!("{operation} failed after {attempts} attempts")));
                }
            }
        }
    }
}
