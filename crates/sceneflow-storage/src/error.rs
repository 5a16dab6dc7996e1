//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to configure storage client: {0}")]
    ConfigError(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::from_http_status(status.as_u16(), e.to_string());
        }
        if e.is_decode() {
            return Self::InvalidResponse(e.to_string());
        }
        let msg = error_chain(&e);
        if looks_like_tls(&msg) {
            Self::Tls(msg)
        } else {
            Self::Network(msg)
        }
    }
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthFailed(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    /// Classify an HTTP error status and its body.
    ///
    /// Drive reports quota exhaustion as 403 with a `rateLimitExceeded` or
    /// `userRateLimitExceeded` reason.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited(message),
            403 if is_rate_limit_body(&message) => Self::RateLimited(message),
            401 | 403 => Self::AuthFailed(message),
            404 => Self::NotFound(message),
            500..=599 => Self::ServerError { status, message },
            _ => Self::RequestFailed(format!("HTTP {}: {}", status, message)),
        }
    }

    /// True if the remote asked us to slow down.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, StorageError::RateLimited(_))
    }

    /// True if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::RateLimited(_)
                | StorageError::Network(_)
                | StorageError::Tls(_)
                | StorageError::ServerError { .. }
        )
    }

    /// HTTP status associated with this error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            StorageError::RateLimited(_) => Some(429),
            StorageError::AuthFailed(_) => Some(401),
            StorageError::NotFound(_) => Some(404),
            StorageError::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn is_rate_limit_body(body: &str) -> bool {
    body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded")
}

pub(crate) fn looks_like_tls(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    lower.contains("tls") || lower.contains("ssl") || lower.contains("certificate")
}

/// Flatten an error and its sources into one line.
pub(crate) fn error_chain(e: &dyn std::error::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}
