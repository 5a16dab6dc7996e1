//! Cloudflare R2 backend.
//!
//! R2 has no folders, so a folder is a key prefix marked by an empty
//! `.folder` object. Folder ids are full prefixes without a trailing slash.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use sceneflow_models::mime_type_for;
use std::path::Path;
use tracing::debug;

use crate::error::{looks_like_tls, StorageError, StorageResult};
use crate::store::{ObjectStore, RemoteFile, RemoteFolder};

const FOLDER_MARKER: &str = ".folder";

/// Configuration for R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
    /// Public base URL for browsing, if the bucket is exposed
    pub public_url: Option<String>,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("R2_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("R2_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("R2_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("R2_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("R2_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("R2_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("R2_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("R2_BUCKET_NAME not set"))?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
            public_url: std::env::var("R2_PUBLIC_URL").ok().filter(|s| !s.is_empty()),
        })
    }
}

/// Cloudflare R2 storage client.
#[derive(Clone)]
pub struct R2Client {
    client: Client,
    bucket: String,
    public_url: Option<String>,
}

impl R2Client {
    /// Create a new R2 client from configuration.
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            public_url: config.public_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(R2Config::from_env()?))
    }

    /// Keys and common prefixes directly under `prefix`.
    async fn list_level(&self, prefix: &str) -> StorageResult<(Vec<(String, u64)>, Vec<String>)> {
        let mut objects = Vec::new();
        let mut prefixes = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .delimiter("/");

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(classify_sdk_error)?;

            for obj in response.contents() {
                if let Some(key) = obj.key() {
                    objects.push((key.to_string(), obj.size().unwrap_or(0).max(0) as u64));
                }
            }
            for p in response.common_prefixes() {
                if let Some(p) = p.prefix() {
                    prefixes.push(p.to_string());
                }
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok((objects, prefixes))
    }
}

fn join_key(parent: Option<&str>, name: &str) -> String {
    match parent {
        Some(p) if !p.is_empty() => format!("{}/{}", p.trim_end_matches('/'), name),
        _ => name.to_string(),
    }
}

fn level_prefix(parent: Option<&str>) -> String {
    match parent {
        Some(p) if !p.is_empty() => format!("{}/", p.trim_end_matches('/')),
        _ => String::new(),
    }
}

/// Last path segment of a key or prefix.
fn leaf_name(key: &str) -> &str {
    key.trim_end_matches('/').rsplit('/').next().unwrap_or(key)
}

/// Map an SDK error onto the shared retry classification.
fn classify_sdk_error<E>(err: SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    if let Some(status) = err.raw_response().map(|r| r.status().as_u16()) {
        if status == 503 && message.contains("SlowDown") {
            return StorageError::RateLimited(message);
        }
        return StorageError::from_http_status(status, message);
    }
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            if looks_like_tls(&message) {
                StorageError::Tls(message)
            } else {
                StorageError::Network(message)
            }
        }
        _ => StorageError::request_failed(message),
    }
}

#[async_trait]
impl ObjectStore for R2Client {
    fn backend(&self) -> &'static str {
        "r2"
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> StorageResult<RemoteFolder> {
        let prefix = join_key(parent, name);
        let marker = format!("{}/{}", prefix, FOLDER_MARKER);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&marker)
            .body(ByteStream::from_static(b""))
            .send()
            .await
            .map_err(classify_sdk_error)?;

        debug!("Created R2 folder marker {}", marker);
        Ok(RemoteFolder {
            id: prefix,
            name: name.to_string(),
        })
    }

    async fn list_folders(&self, parent: Option<&str>) -> StorageResult<Vec<RemoteFolder>> {
        let (_, prefixes) = self.list_level(&level_prefix(parent)).await?;
        Ok(prefixes
            .into_iter()
            .map(|p| {
                let id = p.trim_end_matches('/').to_string();
                RemoteFolder {
                    name: leaf_name(&id).to_string(),
                    id,
                }
            })
            .collect())
    }

    async fn create_file(
        &self,
        name: &str,
        parent: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> StorageResult<RemoteFile> {
        let key = join_key(Some(parent), name);
        let size = bytes.len() as u64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(mime_type)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        debug!("Uploaded {} bytes to {}", size, key);
        Ok(RemoteFile {
            id: key,
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size: Some(size),
        })
    }

    async fn list_files(
        &self,
        parent: &str,
        mime_type: Option<&str>,
    ) -> StorageResult<Vec<RemoteFile>> {
        let (objects, _) = self.list_level(&level_prefix(Some(parent))).await?;
        Ok(objects
            .into_iter()
            .filter(|(key, _)| leaf_name(key) != FOLDER_MARKER)
            .map(|(key, size)| {
                let name = leaf_name(&key).to_string();
                let mime = mime_type_for(Path::new(&name)).to_string();
                RemoteFile {
                    id: key,
                    name,
                    mime_type: mime,
                    size: Some(size),
                }
            })
            .filter(|f| mime_type.map_or(true, |m| f.mime_type == m))
            .collect())
    }

    fn folder_url(&self, folder_id: &str) -> String {
        match &self.public_url {
            Some(base) => format!("{}/{}/", base, folder_id),
            None => format!("r2://{}/{}/", self.bucket, folder_id),
        }
    }
}
