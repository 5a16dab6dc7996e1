//! Upload queue configuration.

use std::time::Duration;

/// Upload queue configuration.
#[derive(Debug, Clone)]
pub struct UploadQueueConfig {
    /// Concurrent upload workers
    pub workers: usize,
    /// Retries per frame before it counts as failed
    pub max_retries: u32,
    /// First retry delay; doubles per attempt
    pub backoff_base: Duration,
    /// Upper bound on retry delay
    pub backoff_max: Duration,
    /// Pause after the store reports rate limiting
    pub rate_limit_cooldown: Duration,
    /// Capacity of the task channel
    pub channel_capacity: usize,
    /// Bounded wait for the next task in each worker
    pub recv_timeout: Duration,
    /// Polling period of `wait_for_drain`
    pub drain_poll_interval: Duration,
    /// Settling delay before a drain is confirmed
    pub drain_grace: Duration,
    /// Log a status line every N queued frames
    pub status_log_every: u64,
}

impl Default for UploadQueueConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            rate_limit_cooldown: Duration::from_secs(10),
            channel_capacity: 1024,
            recv_timeout: Duration::from_secs(1),
            drain_poll_interval: Duration::from_millis(100),
            drain_grace: Duration::from_secs(2),
            status_log_every: 10,
        }
    }
}

impl UploadQueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workers: std::env::var("MAX_UPLOAD_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.workers),
            max_retries: std::env::var("MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            backoff_max: std::env::var("UPLOAD_BACKOFF_MAX_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_max),
            rate_limit_cooldown: std::env::var("UPLOAD_RATE_LIMIT_COOLDOWN_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_cooldown),
            ..defaults
        }
    }

    /// Delay before re-submitting a task whose retry count has just become
    /// `retry_count`: `min(base * 2^retry_count, max)`.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}
