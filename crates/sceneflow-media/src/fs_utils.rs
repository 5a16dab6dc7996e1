//! Output-directory helpers.
//!
//! Frames are matched by a file-name pattern with at most one `*` wildcard,
//! e.g. `frame_*.jpg`.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};

/// File-name pattern with an optional single `*` wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePattern {
    prefix: String,
    suffix: Option<String>,
}

impl FramePattern {
    /// Parse a pattern. More than one `*` is rejected.
    pub fn new(pattern: &str) -> MediaResult<Self> {
        if pattern.is_empty() || pattern.contains('/') {
            return Err(MediaError::InvalidPattern(pattern.to_string()));
        }
        match pattern.split_once('*') {
            Some((_, suffix)) if suffix.contains('*') => {
                Err(MediaError::InvalidPattern(pattern.to_string()))
            }
            Some((prefix, suffix)) => Ok(Self {
                prefix: prefix.to_string(),
                suffix: Some(suffix.to_string()),
            }),
            None => Ok(Self {
                prefix: pattern.to_string(),
                suffix: None,
            }),
        }
    }

    /// Pattern for FFmpeg's `frame_%06d.jpg` output.
    pub fn frames() -> Self {
        Self {
            prefix: "frame_".to_string(),
            suffix: Some(".jpg".to_string()),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.suffix {
            None => name == self.prefix,
            Some(suffix) => {
                name.len() >= self.prefix.len() + suffix.len()
                    && name.starts_with(&self.prefix)
                    && name.ends_with(suffix.as_str())
            }
        }
    }
}

impl Default for FramePattern {
    fn default() -> Self {
        Self::frames()
    }
}

/// Regular files in `dir` whose names match `pattern`, sorted by name.
pub async fn list_matching(dir: &Path, pattern: &FramePattern) -> MediaResult<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !pattern.matches(name) {
            continue;
        }
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

/// Create the output directory if needed.
pub async fn prepare_output_dir(dir: &Path) -> MediaResult<()> {
    fs::create_dir_all(dir).await?;
    debug!("Output directory ready: {}", dir.display());
    Ok(())
}

/// Remove files left over from a previous run. Returns the number removed.
pub async fn clear_stale_frames(dir: &Path, pattern: &FramePattern) -> MediaResult<usize> {
    let stale = list_matching(dir, pattern).await?;
    for path in &stale {
        fs::remove_file(path).await?;
    }
    if !stale.is_empty() {
        info!(
            "Removed {} stale frames from {}",
            stale.len(),
            dir.display()
        );
    }
    Ok(stale.len())
}
