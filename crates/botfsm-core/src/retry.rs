//! Retry policy for backend statements.
//!
//! A `RetryPolicy` bundles the attempt bound, the exponential backoff
//! schedule, and the predicate that decides which faults are transient.
//! `retry_operation` drives any async attempt function under a policy.

use std::future::Future;
use std::time::Duration;

use botfsm_types::config::RetryConfig;
use botfsm_types::error::ExecutorError;

/// Decides whether a failed attempt may be re-run.
pub type RetryPredicate = fn(&ExecutorError) -> bool;

/// Injectable retry policy: attempt bound, backoff schedule, retryable-fault predicate.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    pub is_retryable: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            backoff_multiplier: config.backoff_multiplier,
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            is_retryable: ExecutorError::is_retryable,
        }
    }

    /// A policy that runs every operation exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, multiplier: f64, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.backoff_multiplier = multiplier;
        self.max_backoff = max;
        self
    }

    pub fn with_predicate(mut self, is_retryable: RetryPredicate) -> Self {
        self.is_retryable = is_retryable;
        self
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let millis = (self.initial_backoff.as_millis() as f64 * factor)
            .min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Whether another attempt follows failed attempt `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32, error: &ExecutorError) -> bool {
        attempt < self.max_attempts.max(1) && (self.is_retryable)(error)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable fault, or the
/// policy's attempt bound is reached. `op` receives the 1-based attempt number.
///
/// Returns the error of the last attempt when giving up.
pub async fn retry_operation<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ExecutorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ExecutorError>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(attempt, &e) => {
                let delay = policy.backoff(attempt);
                tracing::debug!(attempt, ?delay, error = %e, "retrying backend operation");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                // The caller reports the final failure.
                tracing::debug!(
                    attempts = attempt,
                    retryable = (policy.is_retryable)(&e),
                    error = %e,
                    "giving up on backend operation"
                );
                return Err(e);
            }
        }
    }
}
