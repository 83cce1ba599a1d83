//! Retry behavior: job-level retry policy and store-level backoff.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use super::job::{Job, MIN_PRIORITY};
use crate::error::{MdusError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff Strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Strategy for calculating delays between store retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed { delay_ms: u64 },
    /// Exponential increase in delay (initial * multiplier^attempt)
    Exponential {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = match self {
            Self::Fixed { delay_ms } => *delay_ms,
            Self::Exponential {
                initial_delay_ms,
                max_delay_ms,
                multiplier,
            } => {
                let delay = (*initial_delay_ms as f64) * multiplier.powi(attempt as i32);
                delay.min(*max_delay_ms as f64) as u64
            }
        };

        Duration::from_millis(ms)
    }

    /// Exponential backoff doubling from `initial`.
    pub fn exponential(initial: Duration) -> Self {
        Self::Exponential {
            initial_delay_ms: initial.as_millis() as u64,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

/// Run `op`, retrying retryable failures with backoff.
///
/// Non-retryable errors return immediately. When the attempts run out the
/// last error is reported as `StoreUnavailable`.
pub async fn retry_transient<T, F, Fut>(
    operation: &'static str,
    max_retries: u32,
    backoff: &BackoffStrategy,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let delay = backoff.delay_for_attempt(attempt);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient store error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_retryable() => {
                return Err(MdusError::store_unavailable(format!(
                    "{} failed after {} attempts: {}",
                    operation,
                    attempt + 1,
                    e
                ))
                .with_source(e));
            }
            Err(e) => return Err(e),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// What to do with a job whose attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to pending at the given priority
    Requeue { priority: i32 },
    /// Retries exhausted
    Fail,
}

/// Job-level retry policy shared by executors and the stuck-job reaper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// How far each retry demotes the job
    pub priority_step: i32,
    /// Demotion never goes below this
    pub min_priority: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            priority_step: 1,
            min_priority: MIN_PRIORITY,
        }
    }
}

impl RetryPolicy {
    /// Decide the fate of `job` after a failure.
    ///
    /// `retry_count` must already include the failure being handled.
    pub fn decide(&self, job: &Job) -> RetryDecision {
        if job.retry_count < job.max_retries {
            let priority = job
                .priority
                .saturating_sub(self.priority_step)
                .max(self.min_priority);
            RetryDecision::Requeue { priority }
        } else {
            RetryDecision::Fail
        }
    }
}
