//! Shared data models for the SceneFlow pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Upload tasks and queue statistics
//! - Scene-change frame records parsed from FFmpeg diagnostics
//! - Run results and error categories
//! - Outbound webhook payloads

pub mod run;
pub mod scene;
pub mod upload;
pub mod utils;
pub mod webhook;

// Re-export common types
pub use run::{ErrorCategory, RunError, RunId, RunResult};
pub use scene::SceneFrameRecord;
pub use upload::{FailedUpload, QueueStatistics, UploadTask};
pub use utils::{diagnostic_sample, mime_type_for, slugify};
pub use webhook::{AnalysisPayload, DiagnosticSample, ReadyPayload, WebhookEvent};
