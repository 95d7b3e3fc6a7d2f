//! Blobs Common - Shared types and utilities
//!
//! This crate provides the types, error definitions and the metadata
//! header codec shared by the blobs client and the local storage server.

pub mod config;
pub mod error;
pub mod metadata;
pub mod source;
pub mod types;

pub use config::{ClientConfig, ConsistencyMode, RetryConfig, ServerConfig};
pub use error::{Error, Result};
pub use metadata::Metadata;
pub use source::BlobSource;
pub use types::*;
