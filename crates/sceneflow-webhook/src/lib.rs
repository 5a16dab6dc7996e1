//! Completion webhooks.
//!
//! This crate provides:
//! - The analysis / ready / callback notification sequence
//! - Ready gating on upload verification with a frame-proportional delay
//! - Per-run de-duplication for caller callbacks with a bounded TTL cache

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod sent_cache;

pub use config::WebhookConfig;
pub use dispatcher::{DeliveryOutcome, DispatchReport, WebhookDispatcher, RUN_ID_HEADER};
pub use error::{WebhookError, WebhookResult};
pub use sent_cache::{normalize_endpoint, SentCache};
