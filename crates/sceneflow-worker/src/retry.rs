//! Retry utilities with exponential backoff.
//!
//! Used for one-shot remote operations during run setup, where a transient
//! store failure should not abort the run outright.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with the given operation name.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Result of a retry operation.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// Operation failed after all retries exhausted, or with an error the
    /// caller classified as permanent.
    Failed { error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success(_))
    }

    /// Convert into a plain `Result`, dropping the attempt count.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::Failed { error, .. } => Err(error),
        }
    }
}

/// Execute an async operation with retry logic.
///
/// `is_retryable` decides whether a failure is worth another attempt; a
/// permanent error is returned immediately.
///
/// # Example
/// ```ignore
/// let config = RetryConfig::new("resolve_folder").with_max_retries(3);
/// let result = retry_async(
///     &config,
///     || resolve_folder(store.as_ref(), "talk_frames", None),
///     StorageError::is_transient,
/// )
/// .await;
/// ```
pub async fn retry_async<F, Fut, T, E, R>(
    config: &RetryConfig,
    operation: F,
    is_retryable: R,
) -> RetryResult<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) if attempt < config.max_retries && is_retryable(&e) => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                debug!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    config.operation_name, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(
                    "{} failed after {} attempt(s): {}",
                    config.operation_name,
                    attempt + 1,
                    e
                );
                return RetryResult::Failed {
                    error: e,
                    attempts: attempt + 1,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let config = RetryConfig::new("test");
        let result: RetryResult<i32, String> =
            retry_async(&config, || async { Ok(42) }, |_| true).await;

        assert!(result.is_success());
        assert_eq!(result.into_result(), Ok(42));
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let config = RetryConfig::new("test")
            .with_max_retries(3)
            .with_base_delay(Duration::from_millis(1));
        let calls = Arc::new(AtomicU32::new(0));

        let result = retry_async(
            &config,
            || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("attempt {} failed", n))
                    } else {
                        Ok(n)
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.into_result(), Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let config = RetryConfig::new("test")
            .with_max_retries(2)
            .with_base_delay(Duration::from_millis(1));

        let result: RetryResult<i32, &str> =
            retry_async(&config, || async { Err("always fails") }, |_| true).await;

        match result {
            RetryResult::Failed { attempts, error } => {
                assert_eq!(attempts, 3);
                assert_eq!(error, "always fails");
            }
            RetryResult::Success(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let config = RetryConfig::new("test").with_base_delay(Duration::from_millis(1));
        let calls = Arc::new(AtomicU32::new(0));

        let result: RetryResult<(), &str> = retry_async(
            &config,
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("unauthorized")
                }
            },
            |_| false,
        )
        .await;

        assert!(!result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
