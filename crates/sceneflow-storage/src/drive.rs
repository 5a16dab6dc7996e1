//! Google Drive v3 REST client.
//!
//! Folders are Drive folders; files are created with a single
//! `multipart/related` upload carrying metadata and content.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::store::{ObjectStore, RemoteFile, RemoteFolder};
use crate::token_cache::{TokenCache, TokenSource};

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const FILE_FIELDS: &str = "id,name,mimeType,size";
const PAGE_SIZE: &str = "1000";

/// Drive client configuration.
#[derive(Clone)]
pub struct DriveConfig {
    /// Base for metadata endpoints (`/drive/v3/...`)
    pub api_base: String,
    /// Base for upload endpoints (`/upload/drive/v3/...`)
    pub upload_base: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    pub token_source: TokenSource,
}

impl DriveConfig {
    /// Create config from environment variables.
    ///
    /// `DRIVE_ACCESS_TOKEN` takes precedence over the service account named
    /// by `GOOGLE_APPLICATION_CREDENTIALS`.
    pub fn from_env() -> StorageResult<Self> {
        let token_source = match std::env::var("DRIVE_ACCESS_TOKEN") {
            Ok(token) if !token.is_empty() => TokenSource::Static(token),
            _ => TokenSource::Provider(Self::service_account()?),
        };

        let api_base = std::env::var("DRIVE_API_BASE")
            .unwrap_or_else(|_| "https://www.googleapis.com".to_string());
        let upload_base = std::env::var("DRIVE_UPLOAD_BASE").unwrap_or_else(|_| api_base.clone());

        let timeout_secs: u64 = std::env::var("DRIVE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        Ok(Self {
            api_base,
            upload_base,
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(10),
            token_source,
        })
    }

    /// Config pointing both bases at `base` with a fixed token.
    pub fn with_static_token(base: impl Into<String>, token: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            api_base: base.clone(),
            upload_base: base,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            token_source: TokenSource::Static(token.into()),
        }
    }

    fn service_account() -> StorageResult<Arc<dyn TokenProvider>> {
        let service_account = CustomServiceAccount::from_env().map_err(|e| {
            StorageError::auth_failed(format!("Failed to load service account: {}", e))
        })?;

        match service_account {
            Some(sa) => Ok(Arc::new(sa)),
            None => Err(StorageError::auth_failed(
                "GOOGLE_APPLICATION_CREDENTIALS not set. \
                 Set it to the path of your service account JSON file.",
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: String,
    size: Option<String>,
}

impl From<DriveFile> for RemoteFile {
    fn from(f: DriveFile) -> Self {
        RemoteFile {
            id: f.id,
            name: f.name,
            mime_type: f.mime_type,
            size: f.size.and_then(|s| s.parse().ok()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

/// Google Drive client.
#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    api_base: String,
    upload_base: String,
    token_cache: Arc<TokenCache>,
}

impl DriveClient {
    pub fn new(config: DriveConfig) -> StorageResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("sceneflow-storage/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StorageError::from)?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            upload_base: config.upload_base.trim_end_matches('/').to_string(),
            token_cache: Arc::new(TokenCache::new(config.token_source)),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Self::new(DriveConfig::from_env()?)
    }

    /// Send an authenticated request, refreshing the token once on 401.
    async fn send<F>(&self, operation: &str, build: F) -> StorageResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let start = Instant::now();
        let span = info_span!("drive_request", operation = %operation);

        async {
            let token = self.token_cache.get_token().await?;
            let mut response = build(&token).send().await?;

            if response.status() == StatusCode::UNAUTHORIZED {
                debug!("Drive returned 401, refreshing token");
                self.token_cache.invalidate().await;
                let token = self.token_cache.get_token().await?;
                response = build(&token).send().await?;
            }

            let status = response.status();
            debug!(
                status = status.as_u16(),
                latency_ms = start.elapsed().as_millis() as u64,
                "Drive request finished"
            );

            if status.is_success() {
                Ok(response)
            } else {
                let body = response.text().await.unwrap_or_default();
                Err(StorageError::from_http_status(
                    status.as_u16(),
                    format!("{} failed: {}", operation, body),
                ))
            }
        }
        .instrument(span)
        .await
    }

    async fn list(&self, query: String) -> StorageResult<Vec<DriveFile>> {
        let url = format!("{}/drive/v3/files", self.api_base);
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response = self
                .send("list_files", |token| {
                    let mut req = self
                        .http
                        .get(&url)
                        .bearer_auth(token)
                        .query(&[
                            ("q", query.as_str()),
                            ("fields", fields.as_str()),
                            ("pageSize", PAGE_SIZE),
                            ("supportsAllDrives", "true"),
                            ("includeItemsFromAllDrives", "true"),
                        ]);
                    if let Some(ref t) = page_token {
                        req = req.query(&[("pageToken", t.as_str())]);
                    }
                    req
                })
                .await?;

            let page: FileList = response.json().await?;
            files.extend(page.files);

            match page.next_page_token {
                Some(t) if !t.is_empty() => page_token = Some(t),
                _ => break,
            }
        }

        Ok(files)
    }
}

/// Quote a value for a Drive search query.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn multipart_related(boundary: &str, metadata: &serde_json::Value, mime_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[async_trait]
impl ObjectStore for DriveClient {
    fn backend(&self) -> &'static str {
        "drive"
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> StorageResult<RemoteFolder> {
        let url = format!("{}/drive/v3/files", self.api_base);
        let mut metadata = json!({ "name": name, "mimeType": FOLDER_MIME });
        if let Some(parent) = parent {
            metadata["parents"] = json!([parent]);
        }

        let response = self
            .send("create_folder", |token| {
                self.http
                    .post(&url)
                    .bearer_auth(token)
                    .query(&[("supportsAllDrives", "true"), ("fields", "id,name")])
                    .json(&metadata)
            })
            .await?;

        let file: DriveFile = response.json().await?;
        Ok(RemoteFolder {
            id: file.id,
            name: file.name,
        })
    }

    async fn list_folders(&self, parent: Option<&str>) -> StorageResult<Vec<RemoteFolder>> {
        let mut query = format!("mimeType = {} and trashed = false", quote(FOLDER_MIME));
        if let Some(parent) = parent {
            query.push_str(&format!(" and {} in parents", quote(parent)));
        }

        Ok(self
            .list(query)
            .await?
            .into_iter()
            .map(|f| RemoteFolder {
                id: f.id,
                name: f.name,
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
        let url = format!("{}/upload/drive/v3/files", self.upload_base);
        let boundary = format!("sceneflow-{}", Uuid::new_v4().simple());
        let metadata = json!({ "name": name, "parents": [parent] });
        let body = multipart_related(&boundary, &metadata, mime_type, &bytes);
        let content_type = format!("multipart/related; boundary={}", boundary);

        let response = self
            .send("create_file", |token| {
                self.http
                    .post(&url)
                    .bearer_auth(token)
                    .query(&[
                        ("uploadType", "multipart"),
                        ("supportsAllDrives", "true"),
                        ("fields", FILE_FIELDS),
                    ])
                    .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                    .body(body.clone())
            })
            .await?;

        let file: DriveFile = response.json().await?;
        debug!(file_id = %file.id, "Uploaded {} ({} bytes)", name, bytes.len());
        Ok(file.into())
    }

    async fn list_files(
        &self,
        parent: &str,
        mime_type: Option<&str>,
    ) -> StorageResult<Vec<RemoteFile>> {
        let mut query = format!("{} in parents and trashed = false", quote(parent));
        if let Some(mime) = mime_type {
            query.push_str(&format!(" and mimeType = {}", quote(mime)));
        }

        Ok(self.list(query).await?.into_iter().map(Into::into).collect())
    }

    fn folder_url(&self, folder_id: &str) -> String {
        format!("https://drive.google.com/drive/folders/{}", folder_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> DriveClient {
        DriveClient::new(DriveConfig::with_static_token(server.uri(), "test-token")).unwrap()
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("abc"), "'abc'");
        assert_eq!(quote("it's"), "'it\\'s'");
    }

    #[test]
    fn test_multipart_body_layout() {
        let body = multipart_related("b", &json!({"name": "f.jpg"}), "image/jpeg", b"DATA");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--b\r\nContent-Type: application/json"));
        assert!(text.contains("Content-Type: image/jpeg\r\n\r\nDATA\r\n--b--\r\n"));
    }

    #[tokio::test]
    async fn test_create_file_uploads_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .and(query_param("uploadType", "multipart"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "file-1",
                "name": "frame_000001.jpg",
                "mimeType": "image/jpeg",
                "size": "4"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let drive = client(&server).await;
        let file = drive
            .create_file("frame_000001.jpg", "folder-1", "image/jpeg", b"jpeg".to_vec())
            .await
            .unwrap();

        assert_eq!(file.id, "file-1");
        assert_eq!(file.size, Some(4));
    }

    #[tokio::test]
    async fn test_list_folders_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{"id": "f2", "name": "b_frames"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{"id": "f1", "name": "a_frames"}],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let drive = client(&server).await;
        let folders = drive.list_folders(Some("parent")).await.unwrap();
        let names: Vec<_> = folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a_frames", "b_frames"]);
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_retryable_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                r#"{"error":{"errors":[{"reason":"userRateLimitExceeded"}],"code":403}}"#,
            ))
            .mount(&server)
            .await;

        let drive = client(&server).await;
        let err = drive
            .create_file("a.jpg", "folder", "image/jpeg", vec![1])
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_not_found_parent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(404).set_body_string("File not found: parent"))
            .mount(&server)
            .await;

        let drive = client(&server).await;
        let err = drive.create_folder("x_frames", Some("parent")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_folder_url() {
        let drive =
            DriveClient::new(DriveConfig::with_static_token("http://localhost", "t")).unwrap();
        assert_eq!(
            drive.folder_url("abc"),
            "https://drive.google.com/drive/folders/abc"
        );
    }
}
