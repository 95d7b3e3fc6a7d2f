//! Error types for the blobs protocol
//!
//! This module defines the common error taxonomy shared by the client and
//! the local storage server.

use crate::types::{BlobKeyError, DeployIdError, StoreNameError};
use thiserror::Error;

/// Common result type for blobs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for blobs operations
#[derive(Debug, Error)]
pub enum Error {
    // Raised before any network attempt
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid blob key: {0}")]
    InvalidKey(#[from] BlobKeyError),

    #[error("invalid store name: {0}")]
    InvalidStoreName(#[from] StoreNameError),

    #[error("invalid deploy ID: {0}")]
    InvalidDeployId(#[from] DeployIdError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("metadata object exceeds the maximum size: {size} bytes, max {max} bytes")]
    MetadataTooLarge { size: usize, max: usize },

    #[error("strong consistency requested but no uncached edge endpoint is configured")]
    ConsistencyConfiguration,

    // Surfaced after the retry policy has run
    #[error("transport error: {0}")]
    Transport(String),

    #[error("{operation} failed with status {status}")]
    UpstreamStatus { operation: String, status: u16 },

    // Local plumbing
    #[error("corrupt metadata header: {0}")]
    MetadataDecode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an upstream status error for an operation
    pub fn upstream(operation: impl Into<String>, status: u16) -> Self {
        Self::UpstreamStatus {
            operation: operation.into(),
            status,
        }
    }

    /// Check if this error came from a local precondition (no I/O attempted)
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey(_)
                | Self::InvalidStoreName(_)
                | Self::InvalidDeployId(_)
                | Self::InvalidArgument(_)
                | Self::MetadataTooLarge { .. }
        )
    }

    /// Check if this is a retryable error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::UpstreamStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Get the HTTP status code a server should answer with
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidKey(_)
            | Self::InvalidStoreName(_)
            | Self::InvalidDeployId(_)
            | Self::InvalidArgument(_)
            | Self::MetadataTooLarge { .. }
            | Self::MetadataDecode(_) => 400,

            Self::UpstreamStatus { status, .. } => *status,

            Self::Transport(_) => 502,

            Self::Configuration(_)
            | Self::ConsistencyConfiguration
            | Self::Io(_)
            | Self::Serialization(_) => 500,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
