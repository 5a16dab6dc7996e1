//! Worker error types.

use sceneflow_media::MediaError;
use sceneflow_models::ErrorCategory;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sceneflow_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] sceneflow_queue::QueueError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] sceneflow_webhook::WebhookError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Run-level category this error is reported under.
    pub fn category(&self) -> ErrorCategory {
        match self {
            WorkerError::Storage(_) => ErrorCategory::StorageInit,
            WorkerError::Media(MediaError::FfmpegNotFound) => ErrorCategory::ExtractionFailed,
            _ => ErrorCategory::Setup,
        }
    }
}
