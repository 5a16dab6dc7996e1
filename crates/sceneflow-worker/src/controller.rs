//! Extraction controller: one run from video to uploaded frames.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use sceneflow_media::{
    clear_stale_frames, list_matching, parse_metadata, prepare_output_dir, read_video_info,
    resolve_fps, scene_extraction_command, terminate, ExtractionProcess, FfmpegCommand,
    FrameSink, FramePattern, FrameWatcher, WatcherHandle,
};
use sceneflow_models::{slugify, ErrorCategory, RunId, RunResult};
use sceneflow_queue::UploadQueue;
use sceneflow_storage::{resolve_folder, ObjectStore, RemoteFolder, StorageError};
use sceneflow_webhook::{DispatchReport, WebhookDispatcher};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

use crate::config::PipelineConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::RunLogger;
use crate::retry::retry_async;

/// Time allowed for workers to exit once a run is over.
const QUEUE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed to collect buffered diagnostic lines after the process ends.
const LINE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Input for one run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub video_path: PathBuf,
    /// Extra endpoint that receives the analysis payload
    pub callback_url: Option<String>,
    /// Overrides the configured scene threshold
    pub threshold: Option<f64>,
    /// Generated when absent
    pub run_id: Option<RunId>,
}

impl RunRequest {
    pub fn new(video_path: impl Into<PathBuf>) -> Self {
        Self {
            video_path: video_path.into(),
            ..Default::default()
        }
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }
}

/// Everything set up before the extraction process starts.
struct Prepared {
    output_dir: PathBuf,
    command: FfmpegCommand,
    folder: RemoteFolder,
}

/// How the monitoring loop ended.
enum ProcessOutcome {
    Exited(std::io::Result<ExitStatus>),
    Stalled,
}

/// Drives extraction, watching, uploading and result assembly for a run.
pub struct ExtractionController {
    config: PipelineConfig,
    store: Arc<dyn ObjectStore>,
    pattern: FramePattern,
}

impl ExtractionController {
    pub fn new(config: PipelineConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            config,
            store,
            pattern: FramePattern::frames(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run. Failures are reported in the result, never returned.
    pub async fn run(&self, request: RunRequest) -> RunResult {
        let run_id = request.run_id.clone().unwrap_or_default();
        let video_name = request
            .video_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let logger = RunLogger::new(&run_id, "scene_extraction");
        let span = logger.create_span();
        let mut result = RunResult::new(run_id, video_name);

        async {
            logger.log_start(&format!("extracting scenes from {}", result.video_name));
            self.execute(&request, &mut result, &logger).await;
            result.finish();

            match &result.error {
                None => logger.log_completion(&format!(
                    "{} frames uploaded in {:.1}s",
                    result.uploaded, result.processing_time_secs
                )),
                Some(e) if result.success => logger.log_completion(&format!(
                    "{} frames uploaded after {}",
                    result.uploaded, e.category
                )),
                Some(e) => logger.log_error(&format!("{}: {}", e.category, e.detail)),
            }
        }
        .instrument(span)
        .await;

        result
    }

    /// Execute one run, then send its notifications.
    pub async fn run_and_notify(
        &self,
        request: RunRequest,
        dispatcher: &WebhookDispatcher,
    ) -> (RunResult, DispatchReport) {
        let callback_url = request.callback_url.clone();
        let result = self.run(request).await;
        let report = dispatcher.dispatch(&result, callback_url.as_deref()).await;
        (result, report)
    }

    async fn execute(&self, request: &RunRequest, result: &mut RunResult, logger: &RunLogger) {
        let prepared = match self.prepare(request, result).await {
            Ok(p) => p,
            Err(e) => {
                result.fail(e.category(), e.to_string());
                return;
            }
        };
        result.folder_id = Some(prepared.folder.id.clone());
        result.folder_url = Some(self.store.folder_url(&prepared.folder.id));

        let queue = UploadQueue::start(
            Arc::clone(&self.store),
            prepared.folder.id.clone(),
            self.config.queue.clone(),
        );

        self.supervise(request, &prepared, &queue, result, logger)
            .await;

        queue.shutdown(QUEUE_SHUTDOWN_TIMEOUT).await;
    }

    /// Output directory, extraction command and remote folder.
    async fn prepare(&self, request: &RunRequest, result: &mut RunResult) -> WorkerResult<Prepared> {
        if !request.video_path.is_file() {
            return Err(WorkerError::setup(format!(
                "video not found: {}",
                request.video_path.display()
            )));
        }

        let slug = run_slug(&request.video_path);
        let output_dir = self.config.work_dir.join(&slug);
        result.output_directory = output_dir.clone();
        prepare_output_dir(&output_dir).await?;
        let removed = clear_stale_frames(&output_dir, &self.pattern).await?;
        if removed > 0 {
            info!("Removed {} stale frames from {}", removed, output_dir.display());
        }

        let threshold = request.threshold.unwrap_or(self.config.scene_threshold);
        let mut command = scene_extraction_command(&request.video_path, &output_dir, threshold)?;
        if let Some(program) = &self.config.ffmpeg_path {
            command = command.program(program);
        }

        let folder_name = format!("{}_frames", slug);
        let parent = self.config.parent_folder_id.as_deref();
        let store = self.store.as_ref();
        let folder = retry_async(
            &self.config.folder_retry,
            || resolve_folder(store, &folder_name, parent),
            StorageError::is_transient,
        )
        .await
        .into_result()?;

        Ok(Prepared {
            output_dir,
            command,
            folder,
        })
    }

    /// Run the extraction process with the watcher feeding `queue`.
    async fn supervise(
        &self,
        request: &RunRequest,
        prepared: &Prepared,
        queue: &Arc<UploadQueue>,
        result: &mut RunResult,
        logger: &RunLogger,
    ) {
        // Frames already on disk are uploaded directly and never re-emitted
        let mut known = HashSet::new();
        match list_matching(&prepared.output_dir, &self.pattern).await {
            Ok(existing) => {
                for path in existing {
                    if queue.enqueue_file(&path).await.is_ok() {
                        known.insert(path);
                    }
                }
            }
            Err(e) => logger.log_warning(&format!("pre-pass listing failed: {}", e)),
        }
        if !known.is_empty() {
            logger.log_progress(&format!("queued {} pre-existing frames", known.len()));
        }

        let sink: Arc<dyn FrameSink> = Arc::clone(queue) as Arc<dyn FrameSink>;
        let watcher = FrameWatcher::new(
            &prepared.output_dir,
            self.pattern.clone(),
            self.config.watcher.clone(),
        )
        .with_known(known);
        let handle = match watcher.start(sink) {
            Ok(h) => h,
            Err(e) => {
                queue.mark_complete();
                result.apply_stats(&queue.snapshot_stats());
                result.fail(ErrorCategory::Setup, e.to_string());
                return;
            }
        };

        let mut process = match ExtractionProcess::spawn(&prepared.command, self.config.line_buffer)
        {
            Ok(p) => p,
            Err(e) => {
                handle.stop().await;
                queue.mark_complete();
                queue.wait_for_drain(self.config.stall_grace).await;
                result.apply_stats(&queue.snapshot_stats());
                result.fail(ErrorCategory::ExtractionFailed, e.to_string());
                return;
            }
        };
        debug!(pid = ?process.id(), "Extraction process started");

        let mut diagnostics = String::new();
        let outcome = self
            .monitor(&mut process, queue, &mut diagnostics, logger)
            .await;

        match outcome {
            ProcessOutcome::Stalled => {
                logger.log_warning(&format!(
                    "no diagnostic output for {:?}, terminating extraction",
                    self.config.stall_timeout
                ));
                if let Err(e) = terminate(&mut process.child, self.config.terminate_grace).await {
                    warn!("Failed to terminate extraction process: {}", e);
                }
                collect_remaining(&mut process.lines, &mut diagnostics).await;

                handle.stop().await;
                queue.mark_complete();
                let drained = queue.wait_for_drain(self.config.stall_grace).await;

                result.stalled = true;
                self.finish_metadata(request, &diagnostics, result).await;
                self.assemble(queue, drained, diagnostics, result);
                result.fail(
                    ErrorCategory::StallTerminated,
                    format!(
                        "no diagnostic output for {}s, process terminated",
                        self.config.stall_timeout.as_secs_f64()
                    ),
                );
                if result.upload_verified() {
                    result.success = true;
                    result.message = format!(
                        "Stalled after uploading {} of {} scene frames",
                        result.uploaded, result.total
                    );
                }
            }
            ProcessOutcome::Exited(Err(e)) => {
                collect_remaining(&mut process.lines, &mut diagnostics).await;
                self.stop_after_failure(handle, queue).await;
                self.assemble(queue, false, diagnostics, result);
                result.fail(
                    ErrorCategory::ExtractionFailed,
                    format!("failed to wait for extraction process: {}", e),
                );
            }
            ProcessOutcome::Exited(Ok(status)) if !status.success() => {
                collect_remaining(&mut process.lines, &mut diagnostics).await;
                self.stop_after_failure(handle, queue).await;
                let detail = format!("FFmpeg exited with {}\n{}", status, diagnostics.trim_end());
                self.assemble(queue, false, diagnostics, result);
                result.fail(ErrorCategory::ExtractionFailed, detail);
            }
            ProcessOutcome::Exited(Ok(_)) => {
                collect_remaining(&mut process.lines, &mut diagnostics).await;
                logger.log_progress("extraction finished, flushing uploads");

                let idle = handle.stop().await;
                self.sweep(&idle, queue, logger).await;
                queue.mark_complete();
                let drained = queue.wait_for_drain(self.config.drain_timeout).await;

                self.finish_metadata(request, &diagnostics, result).await;
                self.assemble(queue, drained, diagnostics, result);

                if !drained {
                    result.fail(
                        ErrorCategory::DrainTimeout,
                        format!(
                            "{} of {} uploads still pending after {}s",
                            result.total.saturating_sub(result.uploaded + result.failed),
                            result.total,
                            self.config.drain_timeout.as_secs_f64()
                        ),
                    );
                } else if result.uploaded == 0 {
                    result.fail(
                        ErrorCategory::NoFramesUploaded,
                        format!("{} frames extracted, none uploaded", result.total),
                    );
                } else {
                    result.success = true;
                    result.message = format!(
                        "Uploaded {} of {} scene frames",
                        result.uploaded, result.total
                    );
                }
            }
        }
    }

    /// Consume diagnostics until the process exits or stops talking.
    async fn monitor(
        &self,
        process: &mut ExtractionProcess,
        queue: &UploadQueue,
        diagnostics: &mut String,
        logger: &RunLogger,
    ) -> ProcessOutcome {
        let mut ticker = tokio::time::interval(self.config.monitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_activity = Instant::now();
        let mut last_queued = 0;
        let mut lines_open = true;

        loop {
            tokio::select! {
                line = process.lines.recv(), if lines_open => match line {
                    Some(line) => {
                        last_activity = Instant::now();
                        diagnostics.push_str(&line);
                        diagnostics.push('\n');
                    }
                    None => lines_open = false,
                },
                status = process.child.wait() => return ProcessOutcome::Exited(status),
                _ = ticker.tick() => {
                    let queued = queue.snapshot_stats().queued;
                    if queued > last_queued {
                        logger.log_progress(&format!(
                            "{} frames detected (+{})",
                            queued,
                            queued - last_queued
                        ));
                        last_queued = queued;
                    }
                    if last_activity.elapsed() >= self.config.stall_timeout {
                        return ProcessOutcome::Stalled;
                    }
                }
            }
        }
    }

    /// Enqueue frames the watcher had not emitted before it stopped.
    async fn sweep(&self, idle: &FrameWatcher, queue: &UploadQueue, logger: &RunLogger) {
        let frames = match list_matching(idle.dir(), &self.pattern).await {
            Ok(frames) => frames,
            Err(e) => {
                logger.log_warning(&format!("final sweep failed: {}", e));
                return;
            }
        };

        let mut swept = 0usize;
        for path in frames.into_iter().filter(|p| !idle.known().contains(p)) {
            if queue.enqueue_file(&path).await.is_ok() {
                swept += 1;
            }
        }
        if swept > 0 {
            logger.log_progress(&format!("final sweep queued {} frames", swept));
        }
    }

    async fn stop_after_failure(&self, handle: WatcherHandle, queue: &UploadQueue) {
        handle.stop().await;
        queue.mark_complete();
        queue.wait_for_drain(self.config.stall_grace).await;
    }

    async fn finish_metadata(&self, request: &RunRequest, diagnostics: &str, result: &mut RunResult) {
        let fps = resolve_fps(&request.video_path).await;
        result.fps = Some(fps);
        result.video_info = read_video_info(&request.video_path).await;
        result.scene_frames = parse_metadata(diagnostics, fps);
    }

    fn assemble(&self, queue: &UploadQueue, drained: bool, diagnostics: String, result: &mut RunResult) {
        result.apply_stats(&queue.snapshot_stats());
        result.drain_completed = drained;
        result.diagnostic_text = diagnostics;
    }
}

/// Pull whatever the reader task still has buffered.
async fn collect_remaining(lines: &mut mpsc::Receiver<String>, diagnostics: &mut String) {
    while let Ok(Some(line)) = tokio::time::timeout(LINE_DRAIN_TIMEOUT, lines.recv()).await {
        diagnostics.push_str(&line);
        diagnostics.push('\n');
    }
}

/// Name shared by a run's output directory and remote folder.
pub fn run_slug(video: &Path) -> String {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    slugify(&stem)
}
