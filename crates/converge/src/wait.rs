//! Wait and retry primitives.
//!
//! Slow operations (a disk becoming visible, a cluster forming) are modelled
//! as bounded polls. A fixed delay is available for the cases that have no
//! observable readiness signal at all.

use crate::error::{ReconcileError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Retry budget and backoff for a poll or retry loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff (1.0 = fixed interval)
    pub backoff_factor: f64,
    /// Maximum delay between attempts
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(300),
        }
    }

    /// Fixed interval polling: `attempts` tries, `interval` apart.
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: interval,
            backoff_factor: 1.0,
            max_delay: interval,
        }
    }

    /// Waiting for an attached disk to show up: 60 tries at 60 seconds.
    pub fn disk_wait() -> Self {
        Self::fixed(60, Duration::from_secs(60))
    }

    /// Waiting for a cluster to form: 60 tries at 10 seconds.
    pub fn cluster_wait() -> Self {
        Self::fixed(60, Duration::from_secs(10))
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Upper bound on the total time spent sleeping.
    pub fn ceiling(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }
}

/// Callback for retry progress notifications.
pub trait RetryCallback {
    /// Called before sleeping ahead of the next attempt.
    ///
    /// # Arguments
    /// * `attempt` - Attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay` - Time until the next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ReconcileError, delay: Duration);
}

/// Execute an operation with retry logic.
///
/// Retryable errors are retried with the configured backoff. Once the
/// budget is spent the last error is escalated to a permanent failure.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match operation(attempt + 1) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if attempt + 1 >= max_attempts {
            return Err(err.escalate(max_attempts));
        }

        let delay = config.delay_for_attempt(attempt);
        if let Some(cb) = callback {
            cb.on_retry(attempt + 1, max_attempts, &err, delay);
        }
        debug!(
            "attempt {}/{} not ready ({err}); next try in {:?}",
            attempt + 1,
            max_attempts,
            delay
        );
        thread::sleep(delay);
        attempt += 1;
    }
}

/// Poll until a predicate holds or the budget is spent.
///
/// Returns the number of polls it took. A predicate error aborts the poll
/// unless it is retryable, in which case it counts as "not yet".
pub fn poll_until<F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    what: &str,
    mut predicate: F,
) -> Result<u32>
where
    F: FnMut() -> Result<bool>,
{
    with_retry(config, callback, |attempt| {
        if predicate()? {
            Ok(attempt)
        } else {
            Err(ReconcileError::transient(format!("{what} not ready")))
        }
    })
}

/// Sleep for a fixed time.
///
/// This is the fallback for waits with no observable readiness signal,
/// e.g. a forced reboot that drops every management session. Prefer
/// [`poll_until`] whenever something can be polled.
pub fn fixed_delay(duration: Duration, reason: &str) {
    info!("fixed delay of {}s: {reason}", duration.as_secs());
    thread::sleep(duration);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryConfig {
        RetryConfig::fixed(attempts, Duration::ZERO)
    }

    #[test]
    fn test_presets_match_wait_policies() {
        let disk = RetryConfig::disk_wait();
        assert_eq!(disk.max_attempts, 60);
        assert_eq!(disk.delay_for_attempt(0), Duration::from_secs(60));
        assert_eq!(disk.delay_for_attempt(30), Duration::from_secs(60));

        let cluster = RetryConfig::cluster_wait();
        assert_eq!(cluster.max_attempts, 60);
        assert_eq!(cluster.delay_for_attempt(59), Duration::from_secs(10));
        assert_eq!(cluster.ceiling(), Duration::from_secs(590));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let config = RetryConfig::new(10, Duration::from_secs(10), 2.0);
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(40));
        assert_eq!(config.delay_for_attempt(8), Duration::from_secs(300));
    }

    #[test]
    fn test_with_retry_non_retryable_error() {
        let attempts = Cell::new(0);
        let result: Result<()> = with_retry(&fast(5), None, |_| {
            attempts.set(attempts.get() + 1);
            Err(ReconcileError::permanent("access denied"))
        });

        assert!(matches!(
            result,
            Err(ReconcileError::PermanentFailure { .. })
        ));
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_with_retry_eventual_success() {
        let result = with_retry(&fast(3), None, |attempt| {
            if attempt < 3 {
                Err(ReconcileError::transient("not yet"))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_exhausted_budget_escalates() {
        let attempts = Cell::new(0);
        let result: Result<()> = with_retry(&fast(60), None, |_| {
            attempts.set(attempts.get() + 1);
            Err(ReconcileError::transient("disk 2 not visible"))
        });

        assert_eq!(attempts.get(), 60);
        match result {
            Err(ReconcileError::PermanentFailure { message }) => {
                assert!(message.contains("60 attempts"));
                assert!(message.contains("disk 2 not visible"));
            }
            other => panic!("expected permanent failure, got {other:?}"),
        }
    }

    #[test]
    fn test_callback_invoked_between_attempts() {
        struct Counting(Arc<AtomicU32>);
        impl RetryCallback for Counting {
            fn on_retry(&self, _: u32, _: u32, _: &ReconcileError, _: Duration) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicU32::new(0));
        let callback = Counting(count.clone());
        let _: Result<()> = with_retry(&fast(3), Some(&callback), |_| {
            Err(ReconcileError::transient("timeout"))
        });

        // Not before the first attempt, not after the last
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_poll_until_counts_polls() {
        let polls = Cell::new(0);
        let taken = poll_until(&fast(10), None, "cluster", || {
            polls.set(polls.get() + 1);
            Ok(polls.get() == 4)
        })
        .unwrap();
        assert_eq!(taken, 4);
    }

    #[test]
    fn test_poll_until_times_out() {
        let result = poll_until(&fast(3), None, "cluster SQLCLU01", || Ok(false));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("cluster SQLCLU01 not ready"));
    }
}
