//! Upload tasks and queue statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::mime_type_for;

/// A single frame waiting to be written to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTask {
    /// Local file to upload
    pub source_path: PathBuf,
    /// Name of the remote file
    pub target_name: String,
    /// Remote folder the file is created in
    pub folder_id: String,
    /// MIME type sent with the upload
    pub mime_type: String,
    /// When the task was first queued
    pub enqueued_at: DateTime<Utc>,
    /// Failed attempts so far
    pub retry_count: u32,
}

impl UploadTask {
    /// Create a task for `path`, naming the remote file after the local one.
    pub fn new(path: impl AsRef<Path>, folder_id: impl Into<String>) -> Self {
        let path = path.as_ref();
        let target_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            source_path: path.to_path_buf(),
            target_name,
            folder_id: folder_id.into(),
            mime_type: mime_type_for(path).to_string(),
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }

    /// Override the remote file name.
    pub fn with_target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = name.into();
        self
    }
}

/// A frame that exhausted its retries or vanished before upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedUpload {
    pub name: String,
    pub path: PathBuf,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// Per-run upload counters.
///
/// `uploaded + failed <= queued` holds for every snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub queued: u64,
    pub uploaded: u64,
    pub failed: u64,
    pub retried: u64,
    pub started_at: DateTime<Utc>,
    /// Permanent failures in the order they happened
    pub failures: Vec<FailedUpload>,
}

impl Default for QueueStatistics {
    fn default() -> Self {
        Self {
            queued: 0,
            uploaded: 0,
            failed: 0,
            retried: 0,
            started_at: Utc::now(),
            failures: Vec::new(),
        }
    }
}

impl QueueStatistics {
    /// Tasks queued but not yet in a terminal state.
    pub fn in_flight(&self) -> u64 {
        self.queued.saturating_sub(self.uploaded + self.failed)
    }

    /// True when every queued task reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.uploaded + self.failed == self.queued
    }

    /// Seconds since the queue started.
    pub fn elapsed_secs(&self) -> f64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// Uploads per second since the queue started.
    pub fn upload_rate(&self) -> f64 {
        self.uploaded as f64 / self.elapsed_secs().max(1.0)
    }

    /// Average wall-clock seconds per successful upload.
    pub fn avg_upload_secs(&self) -> f64 {
        if self.uploaded == 0 {
            return 0.0;
        }
        self.elapsed_secs() / self.uploaded as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_task_naming() {
        let task = UploadTask::new("/tmp/out/frame_000001.jpg", "folder-1");
        assert_eq!(task.target_name, "frame_000001.jpg");
        assert_eq!(task.folder_id, "folder-1");
        assert_eq!(task.mime_type, "image/jpeg");
        assert_eq!(task.retry_count, 0);
    }

    #[test]
    fn test_statistics_in_flight() {
        let stats = QueueStatistics {
            queued: 10,
            uploaded: 6,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(stats.in_flight(), 3);
        assert!(!stats.is_settled());

        let settled = QueueStatistics {
            queued: 4,
            uploaded: 3,
            failed: 1,
            ..Default::default()
        };
        assert!(settled.is_settled());
    }

    #[test]
    fn test_avg_upload_without_uploads() {
        let stats = QueueStatistics::default();
        assert_eq!(stats.avg_upload_secs(), 0.0);
    }
}
