//! Retry utilities for operations that can fail on concurrent modification.
//!
//! Provides configurable retry logic with exponential backoff. Only
//! [`AppError::ConcurrentModification`] is treated as transient; every other
//! error is returned to the caller on the first attempt.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::error::AppError;

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Initial backoff duration before first retry.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff duration.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with the specified max retries.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Create a config with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate backoff duration for a given attempt.
    fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64) as u64;

        let mut duration = Duration::from_millis(backoff_ms);

        if self.add_jitter {
            // Add up to 25% jitter
            let jitter = (backoff_ms as f64 * 0.25 * rand_jitter()) as u64;
            duration += Duration::from_millis(jitter);
        }

        duration
    }
}

/// Simple pseudo-random jitter (0.0 to 1.0) without external dependencies.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Determines whether an error is worth retrying.
pub fn is_retryable(err: &AppError) -> bool {
    matches!(err, AppError::ConcurrentModification(_))
}

/// Re-run `operation` until it succeeds, fails with a non-retryable error,
/// or the retry budget is exhausted.
///
/// The closure is expected to re-read all state it depends on: a retried
/// store transaction must start from scratch.
pub async fn retry_on_conflict<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) && attempt < config.max_retries => {
                let backoff = config.backoff_duration(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying after concurrent modification"
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> AppError {
        AppError::ConcurrentModification(anyhow::anyhow!("stale read"))
    }

    #[tokio::test]
    async fn succeeds_after_transient_conflicts() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig {
            add_jitter: false,
            initial_backoff: Duration::from_millis(1),
            ..Default::default()
        };

        let result = retry_on_conflict(&config, "test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(conflict())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget_exhausted() {
        let config = RetryConfig {
            max_retries: 2,
            add_jitter: false,
            initial_backoff: Duration::from_millis(1),
            ..Default::default()
        };

        let result: Result<(), _> =
            retry_on_conflict(&config, "test", || async { Err(conflict()) }).await;

        assert!(matches!(
            result,
            Err(AppError::ConcurrentModification(_))
        ));
    }

    #[tokio::test]
    async fn does_not_retry_permanent_failures() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result: Result<(), _> = retry_on_conflict(&config, "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::NotFound(anyhow::anyhow!("missing"))) }
        })
        .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
