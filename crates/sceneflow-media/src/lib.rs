//! FFmpeg process control for scene-change frame extraction.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building for the scene `select` filter
//! - Process spawning with a dedicated stderr drain and graceful termination
//! - Frame-rate resolution via ffprobe with a mediainfo fallback
//! - Raw ffprobe format/stream description of the source video
//! - `showinfo` diagnostic parsing into scene-frame records
//! - A polling frame watcher that only emits fully written files

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod metadata;
pub mod probe;
pub mod watcher;

pub use command::{
    check_ffmpeg, check_ffprobe, scene_extraction_command, terminate, ExtractionProcess,
    FfmpegCommand, DEFAULT_OUTPUT_PATTERN,
};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{clear_stale_frames, list_matching, prepare_output_dir, FramePattern};
pub use metadata::{format_timecode, parse_metadata};
pub use probe::{read_video_info, resolve_fps, select_fps, FALLBACK_FPS};
pub use watcher::{FrameSink, FrameWatcher, StableFrame, WatcherConfig, WatcherHandle};
