//! Error types shared across the semantic map pipeline
//!
//! This module provides:
//! - Host query failures raised by workbook adapters
//! - Build failures for the semantic map builder
//! - Network failures with retry classification
//! - Generation failures surfaced to the caller

use std::time::Duration;
use thiserror::Error;

/// Failure while resolving a structural query against the workbook host.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    /// The host is not reachable or refused the batch
    #[error("workbook host unavailable: {0}")]
    Unavailable(String),

    /// A sheet disappeared between enumeration and resolution
    #[error("sheet '{0}' not found")]
    SheetNotFound(String),

    /// The host rejected a query
    #[error("structural query '{operation}' failed: {message}")]
    Query { operation: String, message: String },
}

impl HostError {
    pub fn query(operation: impl Into<String>, message: impl Into<String>) -> Self {
        HostError::Query {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Failure of a semantic map build. Builds are all-or-nothing.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error("semantic map build aborted on sheet '{sheet}': {source}")]
    Sheet {
        sheet: String,
        #[source]
        source: HostError,
    },

    #[error("semantic map build aborted: {0}")]
    Workbook(#[from] HostError),
}

impl BuildError {
    pub fn host_error(&self) -> &HostError {
        match self {
            BuildError::Sheet { source, .. } => source,
            BuildError::Workbook(source) => source,
        }
    }
}

/// Failure of a single network attempt or of a whole retried request.
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    /// The client knew it was offline and never issued the request
    #[error("offline")]
    Offline,

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("response body could not be decoded: {0}")]
    Decode(String),

    #[error("request failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<NetworkError>,
    },
}

impl NetworkError {
    /// Whether a fresh attempt may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetworkError::Offline
                | NetworkError::Timeout(_)
                | NetworkError::HttpStatus { .. }
                | NetworkError::Transport(_)
        )
    }

    /// Stable category string for logs and status reporting
    pub fn code(&self) -> &'static str {
        match self {
            NetworkError::Offline => "offline",
            NetworkError::Timeout(_) => "timeout",
            NetworkError::HttpStatus { .. } => "http_status",
            NetworkError::Transport(_) => "transport",
            NetworkError::Decode(_) => "decode",
            NetworkError::RetriesExhausted { .. } => "retries_exhausted",
        }
    }

    /// The error observed on the final attempt; `self` for single-attempt errors
    pub fn last_error(&self) -> &NetworkError {
        match self {
            NetworkError::RetriesExhausted { last, .. } => last.last_error(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            NetworkError::HttpStatus {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            NetworkError::Decode(err.to_string())
        } else {
            NetworkError::Transport(err.to_string())
        }
    }
}

/// Failure of a formula generation request made on behalf of a user.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("enter a request before generating")]
    EmptyQuery,

    #[error("a formula is already being generated")]
    Busy,

    #[error("offline")]
    Offline,

    #[error("formula generation failed: {0}")]
    Network(#[from] NetworkError),
}
