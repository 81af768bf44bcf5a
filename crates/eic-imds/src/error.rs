// ABOUTME: Error types for instance metadata operations using thiserror.
// ABOUTME: Separates "not found" from other status failures so callers can treat 404 as benign.

use thiserror::Error;

/// Errors that can occur while talking to the instance metadata service.
#[derive(Error, Debug)]
pub enum ImdsError {
    /// The HTTP client could not be constructed.
    #[error("failed to build metadata client: {0}")]
    Client(#[source] reqwest::Error),

    /// The request failed before a response arrived (timeout, refused, reset).
    #[error("metadata request for {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// The response body could not be read.
    #[error("failed to read metadata response for {path}: {source}")]
    Body {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// The metadata service answered 404 for the path.
    #[error("metadata path {path} not found")]
    NotFound { path: String },

    /// The metadata service answered with a non-success status other than 404.
    #[error("metadata service returned HTTP {status} for {path}")]
    Status { path: String, status: u16 },

    /// The token endpoint answered with an empty body.
    #[error("metadata service returned an empty token")]
    EmptyToken,
}

impl ImdsError {
    /// True when the service explicitly reported the path as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ImdsError::NotFound { .. })
    }
}

/// Result type alias using ImdsError.
pub type Result<T> = std::result::Result<T, ImdsError>;
