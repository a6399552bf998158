//! Exponential backoff for transient failures.
//!
//! The command executor retries optimistic concurrency conflicts through
//! [`retry_with_predicate`]; the projection engine uses
//! [`RetryPolicy::delay_for_attempt`] to back off a slot whose commit log
//! reads keep failing.
//!
//! # Example
//!
//! ```rust
//! use eventide_runtime::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default()
//!     .with_initial_delay(Duration::from_millis(50))
//!     .with_max_delay(Duration::from_secs(1));
//!
//! assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(50));
//! assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
//! assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tokio::time::sleep;

/// How often and how patiently to retry.
///
/// The n-th retry waits `initial_delay * multiplier^n`, capped at
/// `max_delay`. Defaults: 3 retries, 100ms initial delay, 30s cap,
/// multiplier 2.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::default().with_max_retries(0)
    }

    /// Set the number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Load the policy from `EVENTIDE_RETRY_*` environment variables.
    ///
    /// - `EVENTIDE_RETRY_MAX_RETRIES` (default 3)
    /// - `EVENTIDE_RETRY_INITIAL_DELAY_MS` (default 100)
    /// - `EVENTIDE_RETRY_MAX_DELAY_MS` (default 30000)
    /// - `EVENTIDE_RETRY_MULTIPLIER` (default 2.0)
    ///
    /// Missing or unparsable values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env::var("EVENTIDE_RETRY_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            initial_delay: env::var("EVENTIDE_RETRY_INITIAL_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.initial_delay, Duration::from_millis),
            max_delay: env::var("EVENTIDE_RETRY_MAX_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.max_delay, Duration::from_millis),
            multiplier: env::var("EVENTIDE_RETRY_MULTIPLIER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.multiplier),
        }
    }

    /// Delay before retry number `attempt` (zero-based), capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms as u64)
    }
}

/// Retry an async operation while `is_retryable` accepts its error.
///
/// Non-retryable errors are returned immediately; retryable ones are retried
/// up to `policy.max_retries` times, sleeping
/// [`RetryPolicy::delay_for_attempt`] between attempts.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last retryable one once the
/// retries are exhausted.
///
/// # Example
///
/// ```rust
/// use eventide_runtime::retry::{RetryPolicy, retry_with_predicate};
///
/// # async fn example() -> Result<(), String> {
/// let policy = RetryPolicy::default().with_max_retries(5);
///
/// let result = retry_with_predicate(
///     policy,
///     || async { Ok::<_, String>(42) },
///     |err: &String| err.contains("transient"),
/// ).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::debug!(error = %err, "Error is not retryable, failing immediately");
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    tracing::error!(attempt, error = %err, "Operation failed after max retries");
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying..."
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick(max_retries: usize) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_initial_delay(Duration::from_millis(1))
    }

    #[test]
    fn delays_grow_by_the_multiplier() {
        let policy = RetryPolicy::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn delays_are_capped() {
        let policy = RetryPolicy::default()
            .with_initial_delay(Duration::from_secs(1))
            .with_multiplier(10.0)
            .with_max_delay(Duration::from_secs(2));

        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(usize::MAX), Duration::from_secs(2));
    }

    #[test]
    fn default_policy_retries_three_times() {
        assert_eq!(RetryPolicy::default().max_retries, 3);
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }

    #[tokio::test]
    async fn retryable_errors_are_retried_until_success() {
        let calls = &AtomicUsize::new(0);

        let result = retry_with_predicate(
            quick(3),
            || async move {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                if call < 2 { Err(format!("transient {call}")) } else { Ok(42) }
            },
            |err: &String| err.starts_with("transient"),
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_return_the_last_error() {
        let calls = &AtomicUsize::new(0);

        let result = retry_with_predicate(
            quick(2),
            || async move {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(format!("transient {call}"))
            },
            |_: &String| true,
        )
        .await;

        assert_eq!(result, Err("transient 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let calls = &AtomicUsize::new(0);

        let result = retry_with_predicate(
            RetryPolicy::default(),
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>("permanent error")
            },
            |err: &&str| err.contains("transient"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
