//! Webhook dispatcher configuration.

use std::time::Duration;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Receives the full run data for every run
    pub analysis_url: Option<String>,
    /// Receives the ready notification for verified runs
    pub processor_url: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Lower bound of the pause before the ready notification
    pub delay_min: Duration,
    /// Pause added per extracted frame
    pub delay_per_frame: Duration,
    /// Upper bound of the pause before the ready notification
    pub delay_max: Duration,
    /// How long a delivery is remembered for de-duplication
    pub sent_ttl: Duration,
    /// Maximum remembered deliveries
    pub sent_capacity: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            analysis_url: None,
            processor_url: None,
            timeout: Duration::from_secs(30),
            delay_min: Duration::from_secs(5),
            delay_per_frame: Duration::from_millis(500),
            delay_max: Duration::from_secs(60),
            sent_ttl: Duration::from_secs(3600),
            sent_capacity: 1024,
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(Duration::from_secs_f64)
}

impl WebhookConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            analysis_url: std::env::var("ANALYSIS_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            processor_url: std::env::var("PROCESSOR_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            timeout: env_secs("WEBHOOK_TIMEOUT_SECS").unwrap_or(defaults.timeout),
            delay_min: env_secs("WEBHOOK_DELAY_MIN_SECS").unwrap_or(defaults.delay_min),
            delay_per_frame: env_secs("WEBHOOK_DELAY_PER_FRAME_SECS")
                .unwrap_or(defaults.delay_per_frame),
            delay_max: env_secs("WEBHOOK_DELAY_MAX_SECS").unwrap_or(defaults.delay_max),
            ..defaults
        }
    }

    /// Pause before the ready notification: `clamp(frames * per_frame, min, max)`.
    pub fn ready_delay(&self, frame_count: u64) -> Duration {
        let scaled = self
            .delay_per_frame
            .saturating_mul(u32::try_from(frame_count).unwrap_or(u32::MAX));
        scaled.max(self.delay_min).min(self.delay_max.max(self.delay_min))
    }
}
