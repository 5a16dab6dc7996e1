//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use sceneflow_media::WatcherConfig;
use sceneflow_queue::UploadQueueConfig;
use sceneflow_webhook::WebhookConfig;

use crate::retry::RetryConfig;

/// Configuration for one extraction-and-upload pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root under which each run gets its own output directory
    pub work_dir: PathBuf,
    /// Scene-change score threshold in [0.0, 1.0]
    pub scene_threshold: f64,
    /// Remote backend: `drive`, `r2` or `memory`
    pub storage_backend: String,
    /// Remote folder under which run folders are created
    pub parent_folder_id: Option<String>,
    /// FFmpeg executable override
    pub ffmpeg_path: Option<PathBuf>,
    /// No diagnostic output for this long means the process is stuck
    pub stall_timeout: Duration,
    /// Time in-flight uploads get after a stall
    pub stall_grace: Duration,
    /// Upper bound on waiting for uploads after a clean exit
    pub drain_timeout: Duration,
    /// Monitoring tick
    pub monitor_interval: Duration,
    /// Time between SIGTERM and SIGKILL
    pub terminate_grace: Duration,
    /// Capacity of the diagnostic line channel
    pub line_buffer: usize,
    /// Retry policy for remote folder resolution
    pub folder_retry: RetryConfig,
    pub watcher: WatcherConfig,
    pub queue: UploadQueueConfig,
    pub webhook: WebhookConfig,
    /// Port for the Prometheus exporter, if enabled
    pub metrics_port: Option<u16>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/sceneflow"),
            scene_threshold: 0.4,
            storage_backend: "drive".to_string(),
            parent_folder_id: None,
            ffmpeg_path: None,
            stall_timeout: Duration::from_secs(300),
            stall_grace: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(600),
            monitor_interval: Duration::from_secs(2),
            terminate_grace: Duration::from_secs(5),
            line_buffer: 1024,
            folder_retry: RetryConfig::new("resolve_folder")
                .with_base_delay(Duration::from_millis(500)),
            watcher: WatcherConfig::default(),
            queue: UploadQueueConfig::default(),
            webhook: WebhookConfig::default(),
            metrics_port: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<f64>(name)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(Duration::from_secs_f64)
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let watcher_defaults = WatcherConfig::default();

        Self {
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            scene_threshold: env_parse("SCENE_THRESHOLD").unwrap_or(defaults.scene_threshold),
            storage_backend: std::env::var("STORAGE_BACKEND")
                .map(|s| s.to_lowercase())
                .unwrap_or(defaults.storage_backend),
            parent_folder_id: std::env::var("DRIVE_PARENT_FOLDER_ID")
                .ok()
                .filter(|s| !s.is_empty()),
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            stall_timeout: env_secs("STALL_TIMEOUT_SECS").unwrap_or(defaults.stall_timeout),
            stall_grace: env_secs("STALL_GRACE_SECS").unwrap_or(defaults.stall_grace),
            drain_timeout: env_secs("DRAIN_TIMEOUT_SECS").unwrap_or(defaults.drain_timeout),
            monitor_interval: env_secs("MONITOR_INTERVAL_SECS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.monitor_interval),
            watcher: WatcherConfig {
                poll_interval: env_secs("FRAME_WATCHER_POLL_INTERVAL")
                    .filter(|d| !d.is_zero())
                    .unwrap_or(watcher_defaults.poll_interval),
                stability_threshold: env_secs("FRAME_WATCHER_STABILITY_TIME")
                    .unwrap_or(watcher_defaults.stability_threshold),
                size_check_interval: env_parse("FRAME_WATCHER_SIZE_CHECK_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(watcher_defaults.size_check_interval),
                ..watcher_defaults
            },
            queue: UploadQueueConfig::from_env(),
            webhook: WebhookConfig::from_env(),
            metrics_port: env_parse("METRICS_PORT"),
            ..defaults
        }
    }
}
