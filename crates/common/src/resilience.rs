//! Retry policy for external calls
//!
//! Wraps `backoff` exponential retry with an attempt ceiling and the
//! `AppError::is_retryable` classification. Non-retryable errors are
//! returned after the first attempt.

use crate::config::RetryConfig;
use crate::errors::{AppError, Result};
use backoff::ExponentialBackoffBuilder;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::warn;

/// Exponential backoff with jitter and a bounded number of attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomization factor in [0, 1]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_retries + 1,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            jitter: 0.0,
        }
    }

    /// Same delays with a different retry count
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_attempts = retries + 1;
        self
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_randomization_factor(self.jitter)
            .with_multiplier(2.0)
            .with_max_interval(self.max_delay)
            .with_max_elapsed_time(None)
            .build();

        let attempts = AtomicU32::new(0);
        let max_attempts = self.max_attempts.max(1);

        backoff::future::retry_notify(
            backoff,
            || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let fut = op();
                async move {
                    match fut.await {
                        Ok(value) => Ok(value),
                        Err(e) if e.is_retryable() && attempt < max_attempts => {
                            Err(backoff::Error::transient(e))
                        }
                        Err(e) => Err(backoff::Error::permanent(e)),
                    }
                }
            },
            |e: AppError, delay: Duration| {
                warn!(
                    operation,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after failure"
                );
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast_policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: retries + 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let result = fast_policy(2)
            .run("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AppError::provider("serper", "503"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = fast_policy(2)
            .run("always-down", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::analysis("bad reply")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = fast_policy(5)
            .run("invalid", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::validation("empty query")) }
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
