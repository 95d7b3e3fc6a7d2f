//! Blobs Client - HTTP client for the blobs protocol
//!
//! This crate turns a plain request/response transport into a resilient
//! store API:
//! - Status-aware retries with rate-limit-reset backoff
//! - Edge (single-hop) and control-plane (two-hop signed URL) addressing
//! - Accumulating, manual and lazy cursor pagination
//! - Typed result conversion and a validating store façade

pub mod client;
pub mod list;
pub mod response;
pub mod retry;
pub mod store;
pub mod transport;

// Re-exports
pub use client::Client;
pub use list::ListOptions;
pub use response::{BlobBody, ResponseType};
pub use retry::RetryTransport;
pub use store::{BlobMetadata, BlobStore, BlobWithMetadata, GetOptions, SetOptions};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
