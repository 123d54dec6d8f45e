//! Retry policy with exponential backoff.
//!
//! Transient failures are retried:
//! - Timeouts
//! - 5xx server errors
//! - Connection resets
//!
//! Never retried:
//! - 4xx client errors (bad coordinates, malformed query)
//! - Caller input validation failures
//! - Cancelled requests (these do not consume the retry budget either)

use std::future::Future;
use std::time::Duration;

/// Default retry configuration
pub const DEFAULT_MAX_RETRIES: u32 = 1;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Should retry the request
    Retry,
    /// Should not retry - permanent failure
    NoRetry,
}

/// Implemented by fetch errors so the cache can classify them.
pub trait Retryable {
    fn retry_decision(&self) -> RetryDecision;

    /// A cancelled fetch is surfaced immediately and never cached.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Check if an HTTP status code is retryable
pub fn is_retryable_status(status: u16) -> RetryDecision {
    match status {
        500..=599 => {
            tracing::debug!("Server error ({}), will retry", status);
            RetryDecision::Retry
        }
        400..=499 => {
            tracing::debug!("Client error ({}), not retryable", status);
            RetryDecision::NoRetry
        }
        _ => RetryDecision::NoRetry,
    }
}

/// Backoff policy: `(attempt, error) -> retry after delay?`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,
    /// Initial delay between retries (doubles each attempt)
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// Default backoff with a different retry budget
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Calculate the delay before retry number `attempt + 1`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let delay_ms = (self.initial_delay.as_millis() as u64).saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }

    /// Decide whether a failure on `attempt` (0-based) should be retried,
    /// and after how long.
    pub fn next_delay<E: Retryable>(&self, attempt: u32, error: &E) -> Option<Duration> {
        if error.is_cancelled() || attempt >= self.max_retries {
            return None;
        }
        match error.retry_decision() {
            RetryDecision::Retry => Some(self.delay_for_attempt(attempt)),
            RetryDecision::NoRetry => None,
        }
    }
}

/// Execute an operation with retry logic.
///
/// Returns the first success, or the last error once the policy declines
/// another attempt.
pub async fn run_with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("Request succeeded after {} retries", attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!("Request cancelled on attempt {}", attempt + 1);
                return Err(e);
            }
            Err(e) => match policy.next_delay(attempt, &e) {
                Some(delay) => {
                    tracing::warn!(
                        "Retryable error on attempt {} of {}: {}; retrying in {:?}",
                        attempt + 1,
                        policy.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    if e.retry_decision() == RetryDecision::Retry {
                        tracing::error!("All {} attempts exhausted: {}", attempt + 1, e);
                    } else {
                        tracing::debug!("Non-retryable error: {}", e);
                    }
                    return Err(e);
                }
            },
        }
    }
}
