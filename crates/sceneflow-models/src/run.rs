//! Run identifiers and aggregate run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::scene::SceneFrameRecord;
use crate::upload::{FailedUpload, QueueStatistics};

/// Unique identifier for one end-to-end pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Category of a run-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Local setup failed (output directory, invalid request)
    Setup,
    /// Remote store authentication or folder resolution failed
    StorageInit,
    /// The extraction process could not start or exited non-zero
    ExtractionFailed,
    /// The extraction process stopped producing diagnostics and was killed
    StallTerminated,
    /// Uploads did not drain before the timeout
    DrainTimeout,
    /// Extraction finished but nothing was uploaded
    NoFramesUploaded,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Setup => "setup",
            ErrorCategory::StorageInit => "storage_init",
            ErrorCategory::ExtractionFailed => "extraction_failed",
            ErrorCategory::StallTerminated => "stall_terminated",
            ErrorCategory::DrainTimeout => "drain_timeout",
            ErrorCategory::NoFramesUploaded => "no_frames_uploaded",
        }
    }

    /// Whether a failure of this category aborts the run outright. Stalls
    /// and drain timeouts keep whatever was uploaded.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Setup | ErrorCategory::StorageInit | ErrorCategory::ExtractionFailed
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured run failure surfaced to callers instead of a propagated error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub category: ErrorCategory,
    pub detail: String,
}

impl RunError {
    pub fn new(category: ErrorCategory, detail: impl Into<String>) -> Self {
        Self {
            category,
            detail: detail.into(),
        }
    }
}

/// Aggregate result of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    /// Run identifier carried by every notification
    pub run_id: RunId,
    /// Overall success flag
    pub success: bool,
    /// Human-readable summary
    pub message: String,
    /// Source video file name
    pub video_name: String,
    /// Frames uploaded successfully
    pub uploaded: u64,
    /// Frames that permanently failed
    pub failed: u64,
    /// Frames queued for upload
    pub total: u64,
    /// Retry attempts scheduled during the run
    pub retried: u64,
    /// Wall-clock processing time in seconds
    pub processing_time_secs: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Remote folder identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    /// Browsable URL of the remote folder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_url: Option<String>,
    /// Local directory frames were written to
    pub output_directory: PathBuf,
    /// Frame rate used to format timestamps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    /// FFprobe `format`/`streams` description of the source video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_info: Option<serde_json::Value>,
    /// Parsed scene-change records in extraction order
    pub scene_frames: Vec<SceneFrameRecord>,
    /// Full diagnostic text captured from the extraction process
    pub diagnostic_text: String,
    /// Whether the extraction process was killed after a stall
    pub stalled: bool,
    /// Whether the upload queue drained before its timeout
    pub drain_completed: bool,
    /// Frames that could not be uploaded
    pub failed_uploads: Vec<FailedUpload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

impl RunResult {
    /// Create an empty result for a run that is about to start.
    pub fn new(run_id: RunId, video_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            video_name: video_name.into(),
            started_at: now,
            finished_at: now,
            ..Default::default()
        }
    }

    /// Copy counters and the failure list from a queue snapshot.
    pub fn apply_stats(&mut self, stats: &QueueStatistics) {
        self.uploaded = stats.uploaded;
        self.failed = stats.failed;
        self.total = stats.queued;
        self.retried = stats.retried;
        self.failed_uploads = stats.failures.clone();
    }

    /// Mark the run as failed with a category and detail.
    pub fn fail(&mut self, category: ErrorCategory, detail: impl Into<String>) {
        let error = RunError::new(category, detail);
        self.success = false;
        self.message = format!("Run failed: {}", error.category);
        self.error = Some(error);
    }

    /// Stamp the finish time and processing duration.
    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
        self.processing_time_secs =
            (self.finished_at - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
    }

    /// Upload verification: at least one upload, and every frame that did
    /// not permanently fail was uploaded.
    pub fn upload_verified(&self) -> bool {
        self.uploaded > 0 && self.uploaded >= self.total.saturating_sub(self.failed)
    }

    /// Whether the run ended on a fatal error category.
    pub fn is_fatal(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.category.is_fatal())
    }

    /// Whether the downstream processor should be told the frames are ready.
    pub fn ready_eligible(&self) -> bool {
        !self.is_fatal() && self.upload_verified()
    }

    /// Number of frames the run produced, used to size notification delays.
    pub fn frame_count(&self) -> u64 {
        self.total.max(self.scene_frames.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(uploaded: u64, total: u64, failed: u64) -> RunResult {
        RunResult {
            uploaded,
            total,
            failed,
            ..Default::default()
        }
    }

    #[test]
    fn test_upload_verified_inequality() {
        assert!(result_with(8, 10, 2).upload_verified());
        assert!(!result_with(7, 10, 2).upload_verified());
        assert!(result_with(10, 10, 0).upload_verified());
    }

    #[test]
    fn test_upload_verified_requires_an_upload() {
        assert!(!result_with(0, 0, 0).upload_verified());
        assert!(!result_with(0, 3, 3).upload_verified());
    }

    #[test]
    fn test_fatal_run_is_not_ready_even_when_verified() {
        let mut result = result_with(1, 1, 0);
        assert!(result.ready_eligible());

        result.fail(ErrorCategory::ExtractionFailed, "exit status 1");
        assert!(result.upload_verified());
        assert!(result.is_fatal());
        assert!(!result.ready_eligible());
    }

    #[test]
    fn test_stall_keeps_ready_eligibility() {
        let mut result = result_with(3, 3, 0);
        result.fail(ErrorCategory::StallTerminated, "no output for 300s");
        assert!(!result.is_fatal());
        assert!(result.ready_eligible());
    }

    #[test]
    fn test_fail_sets_error() {
        let mut result = RunResult::new(RunId::from("run-1"), "clip.mp4");
        result.success = true;
        result.fail(ErrorCategory::ExtractionFailed, "exit status 1");

        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.category, ErrorCategory::ExtractionFailed);
        assert_eq!(error.detail, "exit status 1");
    }

    #[test]
    fn test_error_category_serialization() {
        let json = serde_json::to_string(&ErrorCategory::StallTerminated).unwrap();
        assert_eq!(json, "\"stall_terminated\"");
    }
}
