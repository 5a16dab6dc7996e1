//! In-memory object store for tests and dry runs.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::store::{ObjectStore, RemoteFile, RemoteFolder};

#[derive(Default)]
struct Inner {
    /// folder id -> (parent, folder)
    folders: HashMap<String, (Option<String>, RemoteFolder)>,
    /// folder id -> files in creation order
    files: HashMap<String, Vec<(RemoteFile, Vec<u8>)>>,
}

/// Object store that keeps everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of files in `folder_id`, in upload order.
    pub async fn file_names(&self, folder_id: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .files
            .get(folder_id)
            .map(|files| files.iter().map(|(f, _)| f.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Contents of the first file named `name` in `folder_id`.
    pub async fn file_bytes(&self, folder_id: &str, name: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read().await;
        inner
            .files
            .get(folder_id)?
            .iter()
            .find(|(f, _)| f.name == name)
            .map(|(_, b)| b.clone())
    }

    pub async fn file_count(&self) -> usize {
        self.inner.read().await.files.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> StorageResult<RemoteFolder> {
        let folder = RemoteFolder {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        let mut inner = self.inner.write().await;
        inner
            .folders
            .insert(folder.id.clone(), (parent.map(str::to_string), folder.clone()));
        inner.files.insert(folder.id.clone(), Vec::new());
        Ok(folder)
    }

    async fn list_folders(&self, parent: Option<&str>) -> StorageResult<Vec<RemoteFolder>> {
        let inner = self.inner.read().await;
        let mut folders: Vec<RemoteFolder> = inner
            .folders
            .values()
            .filter(|(p, _)| p.as_deref() == parent)
            .map(|(_, f)| f.clone())
            .collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(folders)
    }

    async fn create_file(
        &self,
        name: &str,
        parent: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> StorageResult<RemoteFile> {
        let mut inner = self.inner.write().await;
        let files = inner
            .files
            .get_mut(parent)
            .ok_or_else(|| StorageError::not_found(format!("folder {}", parent)))?;

        let file = RemoteFile {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size: Some(bytes.len() as u64),
        };
        files.push((file.clone(), bytes));
        Ok(file)
    }

    async fn list_files(
        &self,
        parent: &str,
        mime_type: Option<&str>,
    ) -> StorageResult<Vec<RemoteFile>> {
        let inner = self.inner.read().await;
        let files = inner
            .files
            .get(parent)
            .ok_or_else(|| StorageError::not_found(format!("folder {}", parent)))?;

        Ok(files
            .iter()
            .map(|(f, _)| f)
            .filter(|f| mime_type.map_or(true, |m| f.mime_type == m))
            .cloned()
            .collect())
    }

    fn folder_url(&self, folder_id: &str) -> String {
        format!("memory://{}", folder_id)
    }
}
