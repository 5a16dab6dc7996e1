//! Bearer tokens for the Drive API.
//!
//! Service-account tokens are fetched through `gcp_auth` and reused until
//! shortly before they expire. A refresh holds the write lock, so concurrent
//! uploads wait for one fetch instead of each starting their own.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Tokens closer than this to expiry are refreshed before use.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the provider's expiry cannot be converted.
const FALLBACK_TTL: Duration = Duration::from_secs(50 * 60);

/// OAuth scope for Drive file access.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Where tokens come from.
#[derive(Clone)]
pub enum TokenSource {
    /// Service-account (or other gcp_auth) provider
    Provider(Arc<dyn TokenProvider>),
    /// Pre-issued bearer token, never refreshed
    Static(String),
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN < self.expires_at
    }

    fn is_unexpired(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Map a wall-clock expiry onto the monotonic clock.
fn expiry_instant(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Instant {
    if expires_at <= now {
        return Instant::now();
    }
    Instant::now() + (expires_at - now).to_std().unwrap_or(FALLBACK_TTL)
}

/// Shared token cache for one Drive client.
pub struct TokenCache {
    source: TokenSource,
    cache: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(source: TokenSource) -> Self {
        Self {
            source,
            cache: RwLock::new(None),
        }
    }

    /// Drop the cached token, e.g. after the API answered 401.
    pub async fn invalidate(&self) {
        self.cache.write().await.take();
    }

    /// Current bearer token, fetching a new one when the cached one is stale.
    pub async fn get_token(&self) -> StorageResult<String> {
        let provider = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Provider(provider) => provider,
        };

        if let Some(token) = self.cache.read().await.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let mut cache = self.cache.write().await;
        if let Some(token) = cache.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        match provider.token(&[DRIVE_SCOPE]).await {
            Ok(token) => {
                let value = token.as_str().to_string();
                *cache = Some(CachedToken {
                    value: value.clone(),
                    expires_at: expiry_instant(token.expires_at(), Utc::now()),
                });
                debug!("Fetched new Drive access token");
                Ok(value)
            }
            Err(e) => match cache.as_ref().filter(|t| t.is_unexpired()) {
                Some(token) => {
                    warn!("Drive token refresh failed, reusing current token: {}", e);
                    Ok(token.value.clone())
                }
                None => Err(StorageError::auth_failed(format!(
                    "could not obtain Drive access token: {}",
                    e
                ))),
            },
        }
    }
}
