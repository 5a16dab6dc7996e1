//! Polling watcher that emits frames once FFmpeg has finished writing them.
//!
//! A single task owns the set of emitted paths. Stopping the watcher hands the
//! set back inside an idle [`FrameWatcher`], so a restarted session never
//! re-emits a frame.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{list_matching, FramePattern};

/// Timing knobs for the poll loop.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Delay between directory scans
    pub poll_interval: Duration,
    /// Minimum age of the last modification before a file counts as stable
    pub stability_threshold: Duration,
    /// Gap between the two size reads
    pub size_check_interval: Duration,
    /// How long `stop` waits for the poll task
    pub stop_timeout: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            stability_threshold: Duration::from_millis(200),
            size_check_interval: Duration::from_millis(50),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// A fully written frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StableFrame {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

/// Receiver of stable frames.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn on_stable_frame(&self, frame: StableFrame);
}

/// An idle watcher. Call [`FrameWatcher::start`] to begin a session.
#[derive(Debug)]
pub struct FrameWatcher {
    dir: PathBuf,
    pattern: FramePattern,
    config: WatcherConfig,
    known: HashSet<PathBuf>,
}

impl FrameWatcher {
    pub fn new(dir: impl AsRef<Path>, pattern: FramePattern, config: WatcherConfig) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            pattern,
            config,
            known: HashSet::new(),
        }
    }

    /// Treat `known` as already emitted.
    pub fn with_known(mut self, known: HashSet<PathBuf>) -> Self {
        self.known.extend(known);
        self
    }

    /// Paths emitted so far (including seeded ones).
    pub fn known(&self) -> &HashSet<PathBuf> {
        &self.known
    }

    pub fn into_known(self) -> HashSet<PathBuf> {
        self.known
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start polling, delivering each stable frame to `sink`.
    ///
    /// Fails if the directory does not exist.
    pub fn start(self, sink: Arc<dyn FrameSink>) -> MediaResult<WatcherHandle> {
        if !self.dir.is_dir() {
            error!("Watch directory does not exist: {}", self.dir.display());
            return Err(MediaError::DirectoryNotFound(self.dir));
        }

        info!(
            "Watching {} (poll {:?}, stability {:?}, {} known)",
            self.dir.display(),
            self.config.poll_interval,
            self.config.stability_threshold,
            self.known.len()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let seed = self.known.clone();
        let task = tokio::spawn(poll_loop(
            self.dir.clone(),
            self.pattern.clone(),
            self.config.clone(),
            self.known,
            sink,
            shutdown_rx,
        ));

        Ok(WatcherHandle {
            dir: self.dir,
            pattern: self.pattern,
            config: self.config,
            seed,
            shutdown_tx,
            task,
        })
    }
}

/// A running watch session.
pub struct WatcherHandle {
    dir: PathBuf,
    pattern: FramePattern,
    config: WatcherConfig,
    seed: HashSet<PathBuf>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<HashSet<PathBuf>>,
}

impl WatcherHandle {
    /// Stop the session and return an idle watcher holding the emitted set.
    pub async fn stop(self) -> FrameWatcher {
        let _ = self.shutdown_tx.send(true);
        let abort = self.task.abort_handle();

        let known = match tokio::time::timeout(self.config.stop_timeout, self.task).await {
            Ok(Ok(known)) => known,
            Ok(Err(e)) => {
                error!("Frame watcher task failed: {}", e);
                self.seed
            }
            Err(_) => {
                warn!(
                    "Frame watcher did not stop within {:?}, aborting",
                    self.config.stop_timeout
                );
                abort.abort();
                self.seed
            }
        };

        debug!("Frame watcher stopped with {} known frames", known.len());
        FrameWatcher {
            dir: self.dir,
            pattern: self.pattern,
            config: self.config,
            known,
        }
    }
}

async fn poll_loop(
    dir: PathBuf,
    pattern: FramePattern,
    config: WatcherConfig,
    mut known: HashSet<PathBuf>,
    sink: Arc<dyn FrameSink>,
    mut shutdown: watch::Receiver<bool>,
) -> HashSet<PathBuf> {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match scan_once(&dir, &pattern, &config, &known).await {
            Ok(frames) => {
                for frame in frames {
                    known.insert(frame.path.clone());
                    debug!(frame = %frame.name, size = frame.size, "Stable frame");
                    sink.on_stable_frame(frame).await;
                }
            }
            Err(e) => warn!("Frame scan of {} failed: {}", dir.display(), e),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
    }
    known
}

/// One scan: new candidates are stat'ed, then re-stat'ed after
/// `size_check_interval`. A file is stable when it is non-empty, its size did
/// not change, and its mtime was older than the threshold at the first read.
async fn scan_once(
    dir: &Path,
    pattern: &FramePattern,
    config: &WatcherConfig,
    known: &HashSet<PathBuf>,
) -> MediaResult<Vec<StableFrame>> {
    let candidates: Vec<PathBuf> = list_matching(dir, pattern)
        .await?
        .into_iter()
        .filter(|p| !known.contains(p))
        .collect();

    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let mut first = Vec::with_capacity(candidates.len());
    for path in candidates {
        let Ok(meta) = tokio::fs::metadata(&path).await else {
            continue;
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .unwrap_or_default();
        if meta.len() > 0 && age > config.stability_threshold {
            first.push((path, meta.len()));
        }
    }

    if first.is_empty() {
        return Ok(Vec::new());
    }

    tokio::time::sleep(config.size_check_interval).await;

    let mut stable = Vec::with_capacity(first.len());
    for (path, size) in first {
        let Ok(meta) = tokio::fs::metadata(&path).await else {
            continue;
        };
        if meta.len() != size {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        stable.push(StableFrame { path, name, size });
    }

    Ok(stable)
}
