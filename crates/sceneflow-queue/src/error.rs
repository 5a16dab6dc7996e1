//! Queue error types.

use std::path::PathBuf;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Upload queue is closed")]
    Closed,

    #[error("Source file missing: {0}")]
    SourceMissing(PathBuf),

    #[error("Storage error: {0}")]
    Storage(#[from] sceneflow_storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
