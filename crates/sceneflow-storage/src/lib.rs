//! Remote object stores for extracted frames.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait used by the upload queue
//! - A Google Drive v3 client with service-account token caching
//! - A Cloudflare R2 client where folders are key prefixes
//! - An in-memory store for tests and dry runs
//! - Error classification for retry decisions

pub mod drive;
pub mod error;
pub mod memory;
pub mod r2;
pub mod store;
pub mod token_cache;

use std::sync::Arc;

pub use drive::{DriveClient, DriveConfig};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use r2::{R2Client, R2Config};
pub use store::{resolve_folder, ObjectStore, RemoteFile, RemoteFolder};
pub use token_cache::{TokenCache, TokenSource};

/// Build the backend named by `backend` (`drive`, `r2` or `memory`) from the
/// environment.
pub fn store_from_env(backend: &str) -> StorageResult<Arc<dyn ObjectStore>> {
    match backend {
        "drive" => Ok(Arc::new(DriveClient::from_env()?)),
        "r2" => Ok(Arc::new(R2Client::from_env()?)),
        "memory" => Ok(Arc::new(MemoryStore::new())),
        other => Err(StorageError::config_error(format!(
            "Unknown storage backend: {}",
            other
        ))),
    }
}
