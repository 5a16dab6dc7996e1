//! Upload queue metrics.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Upload attempts by final status (`success`, `failed`).
    pub const UPLOADS_TOTAL: &str = "sceneflow_uploads_total";

    /// Retry attempts scheduled.
    pub const RETRIES_TOTAL: &str = "sceneflow_upload_retries_total";

    /// Latency of successful uploads in seconds.
    pub const LATENCY_SECONDS: &str = "sceneflow_upload_latency_seconds";
}

/// Record a successful upload.
pub fn record_upload_success(latency_secs: f64) {
    counter!(names::UPLOADS_TOTAL, "status" => "success").increment(1);
    histogram!(names::LATENCY_SECONDS).record(latency_secs);
}

/// Record a permanent failure.
pub fn record_upload_failure(reason: &'static str) {
    counter!(names::UPLOADS_TOTAL, "status" => "failed", "reason" => reason).increment(1);
}

/// Record a scheduled retry.
pub fn record_retry(rate_limited: bool) {
    counter!(
        names::RETRIES_TOTAL,
        "rate_limited" => if rate_limited { "true" } else { "false" }
    )
    .increment(1);
}
