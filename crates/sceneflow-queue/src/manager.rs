//! Upload queue manager.
//!
//! Tasks flow through a bounded channel to a pool of workers. Workers never
//! touch the counters directly; they report [`StatsEvent`]s to a single
//! statistics task, which publishes snapshots on a watch channel. Because a
//! task's `Queued` event is sent before the task itself, every snapshot
//! satisfies `uploaded + failed <= queued`.

use async_trait::async_trait;
use chrono::Utc;
use sceneflow_media::{FrameSink, StableFrame};
use sceneflow_models::{FailedUpload, QueueStatistics, UploadTask};
use sceneflow_storage::ObjectStore;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::UploadQueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::metrics;

/// Messages consumed by the statistics owner.
#[derive(Debug)]
enum StatsEvent {
    Queued,
    Uploaded,
    Retried,
    Failed(FailedUpload),
}

/// Handles shared by every worker.
#[derive(Clone)]
struct WorkerContext {
    store: Arc<dyn ObjectStore>,
    config: UploadQueueConfig,
    task_tx: mpsc::Sender<UploadTask>,
    stats_tx: mpsc::UnboundedSender<StatsEvent>,
}

/// Concurrent upload queue for one run.
pub struct UploadQueue {
    folder_id: String,
    config: UploadQueueConfig,
    task_tx: mpsc::Sender<UploadTask>,
    stats_tx: mpsc::UnboundedSender<StatsEvent>,
    stats_rx: watch::Receiver<QueueStatistics>,
    complete: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl UploadQueue {
    /// Spawn the statistics owner and `config.workers` upload workers.
    pub fn start(
        store: Arc<dyn ObjectStore>,
        folder_id: impl Into<String>,
        config: UploadQueueConfig,
    ) -> Arc<Self> {
        let folder_id = folder_id.into();
        let (task_tx, task_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (stats_tx, stats_events) = mpsc::unbounded_channel();
        let (stats_pub, stats_rx) = watch::channel(QueueStatistics::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(stats_loop(stats_events, stats_pub, config.status_log_every));

        let ctx = WorkerContext {
            store,
            config: config.clone(),
            task_tx: task_tx.clone(),
            stats_tx: stats_tx.clone(),
        };
        let task_rx = Arc::new(Mutex::new(task_rx));
        let workers = (0..config.workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    ctx.clone(),
                    Arc::clone(&task_rx),
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        info!(
            folder_id = %folder_id,
            workers = config.workers,
            max_retries = config.max_retries,
            "Upload queue started"
        );

        Arc::new(Self {
            folder_id,
            config,
            task_tx,
            stats_tx,
            stats_rx,
            complete: AtomicBool::new(false),
            shutdown_tx,
            workers: Mutex::new(workers),
        })
    }

    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    /// Queue a task for upload.
    pub async fn enqueue(&self, task: UploadTask) -> QueueResult<()> {
        if *self.shutdown_tx.borrow() {
            return Err(QueueError::Closed);
        }

        let _ = self.stats_tx.send(StatsEvent::Queued);
        debug!(frame = %task.target_name, "Queued upload");

        if let Err(mpsc::error::SendError(task)) = self.task_tx.send(task).await {
            // Keep the counters balanced
            let _ = self.stats_tx.send(StatsEvent::Failed(failure(&task, "upload queue closed")));
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    /// Queue a local file for upload into this run's folder.
    pub async fn enqueue_file(&self, path: impl AsRef<Path>) -> QueueResult<()> {
        self.enqueue(UploadTask::new(path, self.folder_id.clone())).await
    }

    /// Signal that no further frames will be produced.
    pub fn mark_complete(&self) {
        if !self.complete.swap(true, Ordering::SeqCst) {
            let stats = self.snapshot_stats();
            info!(
                queued = stats.queued,
                in_flight = stats.in_flight(),
                "Upload queue marked complete"
            );
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    /// Current statistics.
    pub fn snapshot_stats(&self) -> QueueStatistics {
        self.stats_rx.borrow().clone()
    }

    /// Watch statistics as they change.
    pub fn subscribe(&self) -> watch::Receiver<QueueStatistics> {
        self.stats_rx.clone()
    }

    /// Frames that could not be uploaded.
    pub fn failed_uploads(&self) -> Vec<FailedUpload> {
        self.stats_rx.borrow().failures.clone()
    }

    /// Wait until the queue is complete and every task is terminal.
    ///
    /// A settled state must persist through `drain_grace` with no new frames
    /// before it counts. Returns false if `timeout` elapses first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            loop {
                let stats = self.snapshot_stats();
                if self.is_complete() && stats.is_settled() {
                    tokio::time::sleep(self.config.drain_grace).await;
                    let after = self.snapshot_stats();
                    if after.is_settled() && after.queued == stats.queued {
                        return after;
                    }
                    continue;
                }
                tokio::time::sleep(self.config.drain_poll_interval).await;
            }
        })
        .await;

        match drained {
            Ok(stats) => {
                info!(
                    uploaded = stats.uploaded,
                    failed = stats.failed,
                    retried = stats.retried,
                    "Upload queue drained"
                );
                true
            }
            Err(_) => {
                let stats = self.snapshot_stats();
                warn!(
                    in_flight = stats.in_flight(),
                    complete = self.is_complete(),
                    "Upload queue did not drain within {:?}",
                    timeout
                );
                false
            }
        }
    }

    /// Stop the workers, waiting up to `timeout` for them to exit.
    pub async fn shutdown(&self, timeout: Duration) {
        let _ = self.shutdown_tx.send(true);
        let workers = std::mem::take(&mut *self.workers.lock().await);

        for handle in workers {
            let abort = handle.abort_handle();
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Upload worker panicked: {}", e),
                Err(_) => {
                    warn!("Upload worker did not stop within {:?}, aborting", timeout);
                    abort.abort();
                }
            }
        }
        debug!("Upload queue shut down");
    }
}

#[async_trait]
impl FrameSink for UploadQueue {
    async fn on_stable_frame(&self, frame: StableFrame) {
        if let Err(e) = self.enqueue_file(&frame.path).await {
            error!(frame = %frame.name, "Failed to queue frame: {}", e);
        }
    }
}

fn failure(task: &UploadTask, reason: impl Into<String>) -> FailedUpload {
    FailedUpload {
        name: task.target_name.clone(),
        path: task.source_path.clone(),
        reason: reason.into(),
        attempts: task.retry_count + 1,
        failed_at: Utc::now(),
    }
}

async fn stats_loop(
    mut events: mpsc::UnboundedReceiver<StatsEvent>,
    publish: watch::Sender<QueueStatistics>,
    log_every: u64,
) {
    while let Some(event) = events.recv().await {
        let mut log_status = false;
        publish.send_modify(|stats| match event {
            StatsEvent::Queued => {
                stats.queued += 1;
                log_status = log_every > 0 && stats.queued % log_every == 0;
            }
            StatsEvent::Uploaded => stats.uploaded += 1,
            StatsEvent::Retried => stats.retried += 1,
            StatsEvent::Failed(f) => {
                stats.failed += 1;
                stats.failures.push(f);
            }
        });

        if log_status {
            let stats = publish.borrow();
            info!(
                queued = stats.queued,
                uploaded = stats.uploaded,
                failed = stats.failed,
                retried = stats.retried,
                in_flight = stats.in_flight(),
                rate = format!("{:.2}/s", stats.upload_rate()),
                "Upload status"
            );
        }
    }
}

async fn worker_loop(
    id: usize,
    ctx: WorkerContext,
    tasks: Arc<Mutex<mpsc::Receiver<UploadTask>>>,
    shutdown: watch::Receiver<bool>,
) {
    debug!(worker = id, "Upload worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = {
            let mut rx = tasks.lock().await;
            tokio::time::timeout(ctx.config.recv_timeout, rx.recv()).await
        };

        match next {
            Ok(Some(task)) => process_task(id, &ctx, task).await,
            Ok(None) => break,
            Err(_) => continue,
        }
    }

    debug!(worker = id, "Upload worker stopped");
}

async fn process_task(worker: usize, ctx: &WorkerContext, task: UploadTask) {
    let start = Instant::now();

    let bytes = match tokio::fs::read(&task.source_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                worker,
                frame = %task.target_name,
                "Source file missing, not retrying"
            );
            metrics::record_upload_failure("missing_source");
            let _ = ctx
                .stats_tx
                .send(StatsEvent::Failed(failure(&task, "source file missing")));
            return;
        }
        Err(e) => {
            schedule_retry_or_fail(ctx, task, format!("read failed: {}", e), false);
            return;
        }
    };

    match ctx
        .store
        .create_file(&task.target_name, &task.folder_id, &task.mime_type, bytes)
        .await
    {
        Ok(file) => {
            let latency = start.elapsed().as_secs_f64();
            debug!(
                worker,
                frame = %task.target_name,
                file_id = %file.id,
                latency_ms = (latency * 1000.0) as u64,
                "Uploaded frame"
            );
            metrics::record_upload_success(latency);
            let _ = ctx.stats_tx.send(StatsEvent::Uploaded);
        }
        Err(e) => {
            let rate_limited = e.is_rate_limited();
            if rate_limited {
                warn!(
                    worker,
                    "Rate limited by {}, cooling down for {:?}",
                    ctx.store.backend(),
                    ctx.config.rate_limit_cooldown
                );
                tokio::time::sleep(ctx.config.rate_limit_cooldown).await;
            } else if e.is_transient() {
                debug!(worker, frame = %task.target_name, "Transient upload error: {}", e);
            }
            schedule_retry_or_fail(ctx, task, e.to_string(), rate_limited);
        }
    }
}

/// Re-submit the task after a backoff, or record a permanent failure once
/// the retry budget is spent.
fn schedule_retry_or_fail(ctx: &WorkerContext, mut task: UploadTask, reason: String, rate_limited: bool) {
    if task.retry_count >= ctx.config.max_retries {
        error!(
            frame = %task.target_name,
            attempts = task.retry_count + 1,
            "Upload failed permanently: {}",
            reason
        );
        metrics::record_upload_failure("retries_exhausted");
        let _ = ctx.stats_tx.send(StatsEvent::Failed(failure(&task, reason)));
        return;
    }

    task.retry_count += 1;
    let delay = ctx.config.backoff_for(task.retry_count);
    warn!(
        frame = %task.target_name,
        retry = task.retry_count,
        max_retries = ctx.config.max_retries,
        "Upload failed, retrying in {:?}: {}",
        delay,
        reason
    );
    metrics::record_retry(rate_limited);
    let _ = ctx.stats_tx.send(StatsEvent::Retried);

    let task_tx = ctx.task_tx.clone();
    let stats_tx = ctx.stats_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(mpsc::error::SendError(task)) = task_tx.send(task).await {
            let _ = stats_tx.send(StatsEvent::Failed(failure(&task, "upload queue closed before retry")));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use sceneflow_storage::{MemoryStore, RemoteFile, RemoteFolder, StorageError, StorageResult};
    use std::sync::atomic::AtomicU32;
    use tempfile::TempDir;

    fn fast_config() -> UploadQueueConfig {
        UploadQueueConfig {
            workers: 2,
            max_retries: 3,
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_millis(20),
            rate_limit_cooldown: Duration::from_millis(10),
            recv_timeout: Duration::from_millis(50),
            drain_poll_interval: Duration::from_millis(10),
            drain_grace: Duration::from_millis(50),
            ..Default::default()
        }
    }

    /// Fails the first `failures` uploads with `kind`, then delegates.
    struct ScriptedStore {
        inner: MemoryStore,
        failures: AtomicU32,
        calls: AtomicU32,
        kind: fn() -> StorageError,
        delay: Duration,
    }

    impl ScriptedStore {
        fn new(failures: u32, kind: fn() -> StorageError) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                kind,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl ObjectStore for ScriptedStore {
        fn backend(&self) -> &'static str {
            "scripted"
        }

        async fn create_folder(&self, name: &str, parent: Option<&str>) -> StorageResult<RemoteFolder> {
            self.inner.create_folder(name, parent).await
        }

        async fn list_folders(&self, parent: Option<&str>) -> StorageResult<Vec<RemoteFolder>> {
            self.inner.list_folders(parent).await
        }

        async fn create_file(
            &self,
            name: &str,
            parent: &str,
            mime_type: &str,
            bytes: Vec<u8>,
        ) -> StorageResult<RemoteFile> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err((self.kind)());
            }
            self.inner.create_file(name, parent, mime_type, bytes).await
        }

        async fn list_files(&self, parent: &str, mime_type: Option<&str>) -> StorageResult<Vec<RemoteFile>> {
            self.inner.list_files(parent, mime_type).await
        }

        fn folder_url(&self, folder_id: &str) -> String {
            self.inner.folder_url(folder_id)
        }
    }

    fn server_error() -> StorageError {
        StorageError::from_http_status(503, "unavailable")
    }

    fn rate_limited() -> StorageError {
        StorageError::from_http_status(429, "slow down")
    }

    async fn write_frames(dir: &TempDir, count: usize) -> Vec<std::path::PathBuf> {
        let mut paths = Vec::new();
        for i in 1..=count {
            let path = dir.path().join(format!("frame_{:06}.jpg", i));
            tokio::fs::write(&path, format!("frame {}", i)).await.unwrap();
            paths.push(path);
        }
        paths
    }

    #[tokio::test]
    async fn test_uploads_all_frames_and_drains() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let folder = store.create_folder("clip_frames", None).await.unwrap();
        let queue = UploadQueue::start(store.clone(), folder.id.clone(), fast_config());

        for path in write_frames(&dir, 5).await {
            queue.enqueue_file(&path).await.unwrap();
        }
        queue.mark_complete();

        assert!(queue.wait_for_drain(Duration::from_secs(5)).await);
        let stats = queue.snapshot_stats();
        assert_eq!(stats.queued, 5);
        assert_eq!(stats.uploaded, 5);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.uploaded + stats.failed, stats.queued);

        let mut names = store.file_names(&folder.id).await;
        names.sort();
        assert_eq!(names.len(), 5);
        assert_eq!(names[0], "frame_000001.jpg");
        assert_eq!(
            store.file_bytes(&folder.id, "frame_000003.jpg").await,
            Some(b"frame 3".to_vec())
        );

        queue.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_missing_source_fails_without_retry() {
        let store = Arc::new(MemoryStore::new());
        let folder = store.create_folder("clip_frames", None).await.unwrap();
        let queue = UploadQueue::start(store, folder.id, fast_config());

        queue.enqueue_file("/nonexistent/frame_000001.jpg").await.unwrap();
        queue.mark_complete();

        assert!(queue.wait_for_drain(Duration::from_secs(5)).await);
        let stats = queue.snapshot_stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 0);

        let failures = queue.failed_uploads();
        assert_eq!(failures[0].name, "frame_000001.jpg");
        assert_eq!(failures[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_fourth_failure_is_permanent() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ScriptedStore::new(u32::MAX, server_error));
        let folder = store.create_folder("clip_frames", None).await.unwrap();
        let queue = UploadQueue::start(store.clone(), folder.id, fast_config());

        let paths = write_frames(&dir, 1).await;
        queue.enqueue_file(&paths[0]).await.unwrap();
        queue.mark_complete();

        assert!(queue.wait_for_drain(Duration::from_secs(5)).await);
        let stats = queue.snapshot_stats();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.retried, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.uploaded, 0);
        assert_eq!(store.calls.load(Ordering::SeqCst), 4);
        assert_eq!(queue.failed_uploads()[0].attempts, 4);
    }

    #[tokio::test]
    async fn test_transient_errors_recover() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ScriptedStore::new(2, server_error));
        let folder = store.create_folder("clip_frames", None).await.unwrap();
        let queue = UploadQueue::start(store.clone(), folder.id, fast_config());

        let paths = write_frames(&dir, 1).await;
        queue.enqueue_file(&paths[0]).await.unwrap();
        queue.mark_complete();

        assert!(queue.wait_for_drain(Duration::from_secs(5)).await);
        let stats = queue.snapshot_stats();
        assert_eq!(stats.uploaded, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_rate_limit_cools_down_and_retries() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ScriptedStore::new(1, rate_limited));
        let folder = store.create_folder("clip_frames", None).await.unwrap();
        let queue = UploadQueue::start(store.clone(), folder.id, fast_config());

        let paths = write_frames(&dir, 1).await;
        let started = Instant::now();
        queue.enqueue_file(&paths[0]).await.unwrap();
        queue.mark_complete();

        assert!(queue.wait_for_drain(Duration::from_secs(5)).await);
        assert!(started.elapsed() >= Duration::from_millis(10));
        let stats = queue.snapshot_stats();
        assert_eq!(stats.uploaded, 1);
        assert_eq!(stats.retried, 1);
    }

    #[tokio::test]
    async fn test_drain_requires_mark_complete() {
        let store = Arc::new(MemoryStore::new());
        let folder = store.create_folder("clip_frames", None).await.unwrap();
        let queue = UploadQueue::start(store, folder.id, fast_config());

        assert!(!queue.wait_for_drain(Duration::from_millis(200)).await);
        queue.mark_complete();
        assert!(queue.wait_for_drain(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_drain_times_out_on_slow_store() {
        let dir = TempDir::new().unwrap();
        let mut scripted = ScriptedStore::new(0, server_error);
        scripted.delay = Duration::from_secs(5);
        let store = Arc::new(scripted);
        let folder = store.create_folder("clip_frames", None).await.unwrap();
        let queue = UploadQueue::start(store, folder.id, fast_config());

        let paths = write_frames(&dir, 1).await;
        queue.enqueue_file(&paths[0]).await.unwrap();
        queue.mark_complete();

        assert!(!queue.wait_for_drain(Duration::from_millis(300)).await);
        let stats = queue.snapshot_stats();
        assert_eq!(stats.in_flight(), 1);
        assert!(stats.uploaded + stats.failed <= stats.queued);
    }

    #[tokio::test]
    async fn test_frame_sink_enqueues() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let folder = store.create_folder("clip_frames", None).await.unwrap();
        let queue = UploadQueue::start(store.clone(), folder.id.clone(), fast_config());

        let paths = write_frames(&dir, 1).await;
        queue
            .on_stable_frame(StableFrame {
                path: paths[0].clone(),
                name: "frame_000001.jpg".to_string(),
                size: 7,
            })
            .await;
        queue.mark_complete();

        assert!(queue.wait_for_drain(Duration::from_secs(5)).await);
        assert_eq!(store.file_names(&folder.id).await, vec!["frame_000001.jpg"]);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let queue = UploadQueue::start(store, "folder", fast_config());
        queue.shutdown(Duration::from_secs(1)).await;

        let err = queue.enqueue_file("/tmp/frame_000001.jpg").await.unwrap_err();
        assert!(matches!(err, QueueError::Closed));
        assert_eq!(queue.snapshot_stats().queued, 0);
    }
}
