//! Backend-agnostic object store interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StorageResult;

/// A folder (or key prefix) in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
}

/// A file stored in a remote folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Remote store operations used by the pipeline.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Create a folder under `parent` (or at the root).
    async fn create_folder(&self, name: &str, parent: Option<&str>) -> StorageResult<RemoteFolder>;

    /// Folders directly under `parent` (or at the root).
    async fn list_folders(&self, parent: Option<&str>) -> StorageResult<Vec<RemoteFolder>>;

    /// Write `bytes` as a new file in `parent`.
    async fn create_file(
        &self,
        name: &str,
        parent: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> StorageResult<RemoteFile>;

    /// Files in `parent`, optionally restricted to one MIME type.
    async fn list_files(&self, parent: &str, mime_type: Option<&str>)
        -> StorageResult<Vec<RemoteFile>>;

    /// Browsable URL of a folder.
    fn folder_url(&self, folder_id: &str) -> String;
}

/// Reuse the folder named `name` under `parent`, creating it if absent.
pub async fn resolve_folder(
    store: &dyn ObjectStore,
    name: &str,
    parent: Option<&str>,
) -> StorageResult<RemoteFolder> {
    let existing = store.list_folders(parent).await?;
    if let Some(folder) = existing.into_iter().find(|f| f.name == name) {
        info!(folder_id = %folder.id, "Reusing {} folder {}", store.backend(), name);
        return Ok(folder);
    }

    let folder = store.create_folder(name, parent).await?;
    info!(folder_id = %folder.id, "Created {} folder {}", store.backend(), name);
    Ok(folder)
}
