//! Scene-frame extraction pipeline.
//!
//! This crate provides:
//! - The extraction controller that supervises FFmpeg, the frame watcher
//!   and the upload queue for one run
//! - Pipeline configuration from the environment
//! - Run logging and the retry helper used during setup

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod retry;

pub use config::PipelineConfig;
pub use controller::{run_slug, ExtractionController, RunRequest};
pub use error::{WorkerError, WorkerResult};
pub use logging::RunLogger;
pub use retry::{retry_async, RetryConfig, RetryResult};
