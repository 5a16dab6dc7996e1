//! Frame upload queue.
//!
//! This crate provides:
//! - A bounded task channel served by a pool of upload workers
//! - A single statistics owner publishing snapshots over a watch channel
//! - Bounded retry with exponential backoff and rate-limit cooldown
//! - Drain detection with a settling delay
//! - Upload metrics via the `metrics` facade

pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;

pub use config::UploadQueueConfig;
pub use error::{QueueError, QueueResult};
pub use manager::UploadQueue;
