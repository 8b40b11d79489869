//! Error types for Archway

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure taxonomy for proxied requests
///
/// Every request failure is classified into exactly one of these kinds.
/// The kind drives retry/fallback policy: `network`, `timeout` and
/// `server` failures may be retried against the origin directly, while
/// `cors` and `forbidden` are policy rejections that retrying cannot fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connectivity, DNS or fetch-layer failure
    Network,
    /// Deadline exceeded
    Timeout,
    /// Cross-origin policy rejection
    Cors,
    /// 404-class response
    NotFound,
    /// 5xx-class response
    Server,
    /// 403-class response
    Forbidden,
    /// Anything that matched no other rule
    Unknown,
}

impl ErrorKind {
    /// Whether a failure of this kind is worth re-attempting directly
    /// against the origin
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Server)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Cors => "cors",
            Self::NotFound => "not_found",
            Self::Server => "server",
            Self::Forbidden => "forbidden",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for Archway operations
#[derive(Debug, thiserror::Error)]
pub enum ArchwayError {
    #[error("Proxy is disabled")]
    Disabled,

    #[error("{kind} error: {message}")]
    Request { kind: ErrorKind, message: String },

    #[error("Proxy request failed ({proxied}); direct fallback also failed ({direct})")]
    FallbackExhausted { proxied: String, direct: String },

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ArchwayError {
    /// Shorthand for a classified request failure
    pub fn request(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Request {
            kind,
            message: message.into(),
        }
    }

    /// Classification of this error, `unknown` for non-request failures
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Request { kind, .. } => *kind,
            Self::FallbackExhausted { .. } => ErrorKind::Network,
            _ => ErrorKind::Unknown,
        }
    }
}

// Implement From conversions for common error types

impl From<reqwest::Error> for ArchwayError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() || err.is_request() {
            ErrorKind::Network
        } else {
            crate::faults::classify(&err.to_string())
        };
        Self::Request {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for ArchwayError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for ArchwayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(format!("JSON error: {}", err))
    }
}

impl From<url::ParseError> for ArchwayError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("URL error: {}", err))
    }
}

/// Result type alias for Archway operations
pub type Result<T> = std::result::Result<T, ArchwayError>;
