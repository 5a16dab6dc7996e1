//! Outbound webhook payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::{RunError, RunId, RunResult};
use crate::scene::SceneFrameRecord;
use crate::utils::diagnostic_sample;

/// Kind of notification in the completion sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    /// Comprehensive data for the analysis endpoint
    Analysis,
    /// Frames are uploaded and verified
    Ready,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::Analysis => "analysis",
            WebhookEvent::Ready => "ready",
        }
    }
}

/// Truncated FFmpeg diagnostic output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticSample {
    pub stderr_sample: String,
}

/// Full run data sent to the analysis endpoint and caller callbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub run_id: RunId,
    pub event: WebhookEvent,
    pub success: bool,
    pub message: String,
    pub video_name: String,
    pub frames_extracted: u64,
    pub uploaded: u64,
    pub failed: u64,
    pub retried: u64,
    pub processing_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_url: Option<String>,
    pub output_directory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_info: Option<serde_json::Value>,
    pub scene_metadata: Vec<SceneFrameRecord>,
    pub ffmpeg_output: DiagnosticSample,
    pub stalled: bool,
    pub upload_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    pub timestamp: DateTime<Utc>,
}

impl AnalysisPayload {
    pub fn from_result(result: &RunResult) -> Self {
        Self {
            run_id: result.run_id.clone(),
            event: WebhookEvent::Analysis,
            success: result.success,
            message: result.message.clone(),
            video_name: result.video_name.clone(),
            frames_extracted: result.total,
            uploaded: result.uploaded,
            failed: result.failed,
            retried: result.retried,
            processing_time: (result.processing_time_secs * 100.0).round() / 100.0,
            folder_id: result.folder_id.clone(),
            folder_url: result.folder_url.clone(),
            output_directory: result.output_directory.display().to_string(),
            fps: result.fps,
            video_info: result.video_info.clone(),
            scene_metadata: result.scene_frames.clone(),
            ffmpeg_output: DiagnosticSample {
                stderr_sample: diagnostic_sample(&result.diagnostic_text),
            },
            stalled: result.stalled,
            upload_verified: result.upload_verified(),
            error: result.error.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Notification that a run's frames are available in the remote folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub run_id: RunId,
    pub event: WebhookEvent,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_url: Option<String>,
    pub frame_count: u64,
    pub uploaded: u64,
    pub failed: u64,
    pub total: u64,
    pub timestamp: DateTime<Utc>,
}

impl ReadyPayload {
    pub fn from_result(result: &RunResult) -> Self {
        Self {
            run_id: result.run_id.clone(),
            event: WebhookEvent::Ready,
            success: result.success,
            folder_id: result.folder_id.clone(),
            folder_url: result.folder_url.clone(),
            frame_count: result.frame_count(),
            uploaded: result.uploaded,
            failed: result.failed,
            total: result.total,
            timestamp: Utc::now(),
        }
    }
}
