//! End-to-end runs against a scripted stand-in for FFmpeg and the in-memory
//! store.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sceneflow_media::WatcherConfig;
use sceneflow_models::{ErrorCategory, RunId};
use sceneflow_queue::UploadQueueConfig;
use sceneflow_storage::{
    MemoryStore, ObjectStore, RemoteFile, RemoteFolder, StorageError, StorageResult,
};
use sceneflow_webhook::{DeliveryOutcome, WebhookConfig, WebhookDispatcher};
use sceneflow_worker::{ExtractionController, PipelineConfig, RetryConfig, RunRequest};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Writes three frames with matching showinfo lines, then exits cleanly.
const THREE_FRAMES: &str = r#"#!/bin/sh
for last; do :; done
out_dir=$(dirname "$last")
i=1
while [ "$i" -le 3 ]; do
  printf 'frame-%d-data' "$i" > "$(printf '%s/frame_%06d.jpg' "$out_dir" "$i")"
  echo "[Parsed_showinfo_1 @ 0x55d0] n:   $((i - 1)) pts:  $((i * 46080)) pts_time:$i.5 duration:512" >&2
  sleep 0.1
  i=$((i + 1))
done
exit 0
"#;

/// Writes one frame, then hangs without output.
const STALLS: &str = r#"#!/bin/sh
for last; do :; done
out_dir=$(dirname "$last")
printf 'only-frame' > "$out_dir/frame_000001.jpg"
echo "[Parsed_showinfo_1 @ 0x55d0] n:   0 pts:  46080 pts_time:1.5 duration:512" >&2
exec sleep 30
"#;

/// Writes one frame that gets uploaded, then exits with an error.
const FAILS_AFTER_FRAME: &str = r#"#!/bin/sh
for last; do :; done
out_dir=$(dirname "$last")
printf 'partial-frame' > "$out_dir/frame_000001.jpg"
echo "[Parsed_showinfo_1 @ 0x55d0] n:   0 pts:  46080 pts_time:1.5 duration:512" >&2
sleep 0.5
echo "Error while decoding stream #0:0: Invalid data found when processing input" >&2
exit 1
"#;

const FAILS: &str = r#"#!/bin/sh
echo "input.mp4: Invalid data found when processing input" >&2
exit 1
"#;

struct Fixture {
    _tmp: TempDir,
    work_dir: PathBuf,
    video: PathBuf,
    ffmpeg: PathBuf,
}

fn fixture(script: &str) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let work_dir = tmp.path().join("work");
    let video = tmp.path().join("Team Talk.mp4");
    std::fs::write(&video, b"not really a video").unwrap();

    let ffmpeg = tmp.path().join("fake-ffmpeg");
    std::fs::write(&ffmpeg, script).unwrap();
    std::fs::set_permissions(&ffmpeg, std::fs::Permissions::from_mode(0o755)).unwrap();

    Fixture {
        _tmp: tmp,
        work_dir,
        video,
        ffmpeg,
    }
}

fn config(work_dir: &Path, ffmpeg: &Path) -> PipelineConfig {
    PipelineConfig {
        work_dir: work_dir.to_path_buf(),
        ffmpeg_path: Some(ffmpeg.to_path_buf()),
        stall_timeout: Duration::from_secs(30),
        stall_grace: Duration::from_secs(2),
        drain_timeout: Duration::from_secs(10),
        monitor_interval: Duration::from_millis(50),
        terminate_grace: Duration::from_secs(1),
        folder_retry: RetryConfig::new("resolve_folder")
            .with_max_retries(2)
            .with_base_delay(Duration::from_millis(1)),
        watcher: WatcherConfig {
            poll_interval: Duration::from_millis(50),
            stability_threshold: Duration::from_millis(50),
            size_check_interval: Duration::from_millis(10),
            stop_timeout: Duration::from_secs(2),
        },
        queue: UploadQueueConfig {
            backoff_base: Duration::from_millis(1),
            recv_timeout: Duration::from_millis(50),
            drain_poll_interval: Duration::from_millis(20),
            drain_grace: Duration::from_millis(100),
            ..Default::default()
        },
        webhook: WebhookConfig {
            delay_min: Duration::ZERO,
            delay_per_frame: Duration::ZERO,
            delay_max: Duration::ZERO,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_clean_run_uploads_every_frame() {
    let fx = fixture(THREE_FRAMES);
    let store = Arc::new(MemoryStore::new());

    // Leftovers from an earlier run must not be uploaded
    let output_dir = fx.work_dir.join("team_talk");
    std::fs::create_dir_all(&output_dir).unwrap();
    std::fs::write(output_dir.join("frame_000099.jpg"), b"stale").unwrap();

    let controller = ExtractionController::new(config(&fx.work_dir, &fx.ffmpeg), store.clone());
    let result = controller
        .run(RunRequest::new(&fx.video).with_run_id(RunId::from("run-clean")))
        .await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert!(result.error.is_none());
    assert!(result.drain_completed);
    assert!(!result.stalled);
    assert_eq!(result.run_id.as_str(), "run-clean");
    assert_eq!(result.video_name, "Team Talk.mp4");
    assert_eq!(result.output_directory, output_dir);
    assert_eq!((result.uploaded, result.failed, result.total), (3, 0, 3));
    // Not a real container, so ffprobe has nothing to describe
    assert!(result.video_info.is_none());

    let folder_id = result.folder_id.clone().unwrap();
    let mut names = store.file_names(&folder_id).await;
    names.sort();
    assert_eq!(
        names,
        vec!["frame_000001.jpg", "frame_000002.jpg", "frame_000003.jpg"]
    );
    assert_eq!(
        store.file_bytes(&folder_id, "frame_000002.jpg").await.unwrap(),
        b"frame-2-data".to_vec()
    );

    let folders = store.list_folders(None).await.unwrap();
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].name, "team_talk_frames");

    assert_eq!(result.fps, Some(30.0));
    assert_eq!(result.scene_frames.len(), 3);
    assert_eq!(result.scene_frames[0].frame_number, 1);
    assert_eq!(result.scene_frames[0].formatted_time, "00:00:01:15");
    assert!(result.diagnostic_text.contains("Parsed_showinfo"));
}

#[tokio::test]
async fn test_second_run_reuses_folder() {
    let fx = fixture(THREE_FRAMES);
    let store = Arc::new(MemoryStore::new());
    let controller = ExtractionController::new(config(&fx.work_dir, &fx.ffmpeg), store.clone());

    let first = controller.run(RunRequest::new(&fx.video)).await;
    let second = controller.run(RunRequest::new(&fx.video)).await;

    assert!(first.success && second.success);
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.folder_id, second.folder_id);
    assert_eq!(store.list_folders(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stalled_process_is_terminated() {
    let fx = fixture(STALLS);
    let store = Arc::new(MemoryStore::new());
    let config = PipelineConfig {
        stall_timeout: Duration::from_millis(500),
        ..config(&fx.work_dir, &fx.ffmpeg)
    };
    let controller = ExtractionController::new(config, store);

    let started = Instant::now();
    let result = controller.run(RunRequest::new(&fx.video)).await;

    assert!(started.elapsed() < Duration::from_secs(15));
    assert!(result.stalled);
    assert_eq!(
        result.error.as_ref().map(|e| e.category),
        Some(ErrorCategory::StallTerminated)
    );
    assert_eq!(result.uploaded, 1);
    assert_eq!(result.total, 1);
    // Verified uploads make a stalled run a success
    assert!(result.success);
    assert_eq!(result.scene_frames.len(), 1);
}

#[tokio::test]
async fn test_non_zero_exit_fails_run() {
    let fx = fixture(FAILS);
    let store = Arc::new(MemoryStore::new());
    let controller = ExtractionController::new(config(&fx.work_dir, &fx.ffmpeg), store);

    let result = controller.run(RunRequest::new(&fx.video)).await;

    assert!(!result.success);
    let error = result.error.expect("error recorded");
    assert_eq!(error.category, ErrorCategory::ExtractionFailed);
    assert!(error.detail.contains("Invalid data found"));
    assert_eq!(result.uploaded, 0);
}

#[tokio::test]
async fn test_missing_video_is_setup_failure() {
    let fx = fixture(THREE_FRAMES);
    let store = Arc::new(MemoryStore::new());
    let controller = ExtractionController::new(config(&fx.work_dir, &fx.ffmpeg), store.clone());

    let result = controller
        .run(RunRequest::new(fx.work_dir.join("missing.mp4")))
        .await;

    assert!(!result.success);
    assert_eq!(result.error.map(|e| e.category), Some(ErrorCategory::Setup));
    assert!(store.list_folders(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_threshold_is_setup_failure() {
    let fx = fixture(THREE_FRAMES);
    let controller =
        ExtractionController::new(config(&fx.work_dir, &fx.ffmpeg), Arc::new(MemoryStore::new()));

    let result = controller
        .run(RunRequest::new(&fx.video).with_threshold(1.5))
        .await;

    assert_eq!(result.error.map(|e| e.category), Some(ErrorCategory::Setup));
}

/// Store whose credentials are always rejected.
struct RejectingStore;

#[async_trait]
impl ObjectStore for RejectingStore {
    fn backend(&self) -> &'static str {
        "rejecting"
    }

    async fn create_folder(&self, _name: &str, _parent: Option<&str>) -> StorageResult<RemoteFolder> {
        Err(StorageError::auth_failed("invalid credentials"))
    }

    async fn list_folders(&self, _parent: Option<&str>) -> StorageResult<Vec<RemoteFolder>> {
        Err(StorageError::auth_failed("invalid credentials"))
    }

    async fn create_file(
        &self,
        _name: &str,
        _parent: &str,
        _mime_type: &str,
        _bytes: Vec<u8>,
    ) -> StorageResult<RemoteFile> {
        Err(StorageError::auth_failed("invalid credentials"))
    }

    async fn list_files(
        &self,
        _parent: &str,
        _mime_type: Option<&str>,
    ) -> StorageResult<Vec<RemoteFile>> {
        Err(StorageError::auth_failed("invalid credentials"))
    }

    fn folder_url(&self, folder_id: &str) -> String {
        format!("rejecting://{}", folder_id)
    }
}

#[tokio::test]
async fn test_store_auth_failure_is_fatal_before_uploads() {
    let fx = fixture(THREE_FRAMES);
    let controller = ExtractionController::new(config(&fx.work_dir, &fx.ffmpeg), Arc::new(RejectingStore));

    let result = controller.run(RunRequest::new(&fx.video)).await;

    assert!(!result.success);
    assert_eq!(result.error.map(|e| e.category), Some(ErrorCategory::StorageInit));
    assert!(result.folder_id.is_none());
    // FFmpeg never ran
    assert!(!fx.work_dir.join("team_talk/frame_000001.jpg").exists());
}

#[tokio::test]
async fn test_run_and_notify_sends_analysis_and_ready() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analysis"))
        .and(body_partial_json(serde_json::json!({"event": "analysis", "uploaded": 3})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ready"))
        .and(body_partial_json(serde_json::json!({"event": "ready"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/callback"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let fx = fixture(THREE_FRAMES);
    let mut config = config(&fx.work_dir, &fx.ffmpeg);
    config.webhook.analysis_url = Some(format!("{}/analysis", server.uri()));
    config.webhook.processor_url = Some(format!("{}/ready", server.uri()));
    let dispatcher = WebhookDispatcher::new(config.webhook.clone()).unwrap();
    let controller = ExtractionController::new(config, Arc::new(MemoryStore::new()));

    let request = RunRequest::new(&fx.video).with_callback_url(format!("{}/callback", server.uri()));
    let (result, report) = controller.run_and_notify(request, &dispatcher).await;

    assert!(result.success);
    assert_eq!(report.analysis, Some(DeliveryOutcome::Sent));
    assert_eq!(report.ready, Some(DeliveryOutcome::Sent));
    assert_eq!(report.callback, Some(DeliveryOutcome::Sent));
}

#[tokio::test]
async fn test_failed_run_still_sends_analysis_without_ready() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analysis"))
        .and(body_partial_json(serde_json::json!({"success": false})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ready"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let fx = fixture(FAILS);
    let mut config = config(&fx.work_dir, &fx.ffmpeg);
    config.webhook.analysis_url = Some(format!("{}/analysis", server.uri()));
    config.webhook.processor_url = Some(format!("{}/ready", server.uri()));
    let dispatcher = WebhookDispatcher::new(config.webhook.clone()).unwrap();
    let controller = ExtractionController::new(config, Arc::new(MemoryStore::new()));

    let (result, report) = controller
        .run_and_notify(RunRequest::new(&fx.video), &dispatcher)
        .await;

    assert!(!result.success);
    assert_eq!(report.analysis, Some(DeliveryOutcome::Sent));
    assert_eq!(report.ready, None);
}

#[tokio::test]
async fn test_failed_exit_after_uploads_withholds_ready() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analysis"))
        .and(body_partial_json(serde_json::json!({"success": false, "uploaded": 1})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ready"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let fx = fixture(FAILS_AFTER_FRAME);
    let mut config = config(&fx.work_dir, &fx.ffmpeg);
    config.webhook.analysis_url = Some(format!("{}/analysis", server.uri()));
    config.webhook.processor_url = Some(format!("{}/ready", server.uri()));
    let dispatcher = WebhookDispatcher::new(config.webhook.clone()).unwrap();
    let controller = ExtractionController::new(config, Arc::new(MemoryStore::new()));

    let (result, report) = controller
        .run_and_notify(RunRequest::new(&fx.video), &dispatcher)
        .await;

    assert!(!result.success);
    assert_eq!(
        result.error.as_ref().map(|e| e.category),
        Some(ErrorCategory::ExtractionFailed)
    );
    assert_eq!((result.uploaded, result.total), (1, 1));
    assert!(result.upload_verified());
    assert_eq!(report.analysis, Some(DeliveryOutcome::Sent));
    assert_eq!(report.ready, None);
}
