//! Core type definitions for the blobs protocol
//!
//! This module defines the validated identifiers (keys, store names,
//! deploy IDs), the store variants and the list wire format.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum size of a blob key (UTF-8 bytes)
pub const MAX_KEY_LENGTH: usize = 600;

/// Maximum size of a store name (UTF-8 bytes)
pub const MAX_STORE_NAME_LENGTH: usize = 64;

/// Maximum length of a deploy ID
pub const MAX_DEPLOY_ID_LENGTH: usize = 24;

/// Reserved prefix for deploy-scoped store names
pub const DEPLOY_STORE_PREFIX: &str = "deploy:";

/// Key of a blob within a store
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct BlobKey(String);

impl BlobKey {
    /// Create a new blob key
    pub fn new(key: impl Into<String>) -> Result<Self, BlobKeyError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments of the key, split on `/`
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    fn validate(key: &str) -> Result<(), BlobKeyError> {
        if key.is_empty() {
            return Err(BlobKeyError::Empty);
        }

        // `%2F` is rejected too so an encoded slash cannot sneak past the check
        if key.starts_with('/') || key.starts_with("%2F") {
            return Err(BlobKeyError::LeadingSlash);
        }

        if key.len() > MAX_KEY_LENGTH {
            return Err(BlobKeyError::TooLong);
        }

        Ok(())
    }
}

impl fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobKey({:?})", self.0)
    }
}

impl AsRef<str> for BlobKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur when creating a blob key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobKeyError {
    #[error("blob key must not be empty")]
    Empty,
    #[error("blob key must not start with a forward slash")]
    LeadingSlash,
    #[error("blob key must be a sequence of Unicode characters whose UTF-8 encoding is at most 600 bytes long")]
    TooLong,
}

/// Name of a store, as used on the wire and on disk
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct StoreName(String);

impl StoreName {
    /// Create a new user-facing store name
    pub fn new(name: impl Into<String>) -> Result<Self, StoreNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Get the store name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> Result<(), StoreNameError> {
        if name.is_empty() {
            return Err(StoreNameError::Empty);
        }

        if name.contains('/') || name.contains("%2F") {
            return Err(StoreNameError::ContainsSlash);
        }

        if name.starts_with(DEPLOY_STORE_PREFIX) {
            return Err(StoreNameError::ReservedPrefix);
        }

        if name.len() > MAX_STORE_NAME_LENGTH {
            return Err(StoreNameError::TooLong);
        }

        Ok(())
    }
}

impl fmt::Debug for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreName({:?})", self.0)
    }
}

/// Errors that can occur when creating a store name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreNameError {
    #[error("store name must not be empty")]
    Empty,
    #[error("store name must not contain forward slashes")]
    ContainsSlash,
    #[error("store name must not start with the reserved prefix `deploy:`")]
    ReservedPrefix,
    #[error("store name must be a sequence of Unicode characters whose UTF-8 encoding is at most 64 bytes long")]
    TooLong,
}

/// Identifier of a deploy, used to scope a store to one deployment
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct DeployId(String);

impl DeployId {
    /// Create a new deploy ID (`^\w{1,24}$`, ASCII word characters)
    pub fn new(id: impl Into<String>) -> Result<Self, DeployIdError> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_DEPLOY_ID_LENGTH {
            return Err(DeployIdError::InvalidLength);
        }
        if let Some(c) = id.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
            return Err(DeployIdError::InvalidChar(c));
        }
        Ok(Self(id))
    }

    /// Get the deploy ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DeployId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeployId({:?})", self.0)
    }
}

/// Errors that can occur when creating a deploy ID
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeployIdError {
    #[error("deploy ID must be between 1 and 24 characters long")]
    InvalidLength,
    #[error("deploy ID contains invalid character: {0}")]
    InvalidChar(char),
}

/// A namespace of blobs
///
/// Deploy-scoped stores are mapped to their reserved-prefixed name once,
/// when the value is built.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Store {
    /// Site-wide store with a user-chosen name
    Named(StoreName),
    /// Store tied to the lifetime of one deploy
    Deploy { deploy_id: DeployId, name: StoreName },
}

impl Store {
    /// Create a named store
    pub fn named(name: impl Into<String>) -> Result<Self, StoreNameError> {
        Ok(Self::Named(StoreName::new(name)?))
    }

    /// Create a deploy-scoped store
    pub fn deploy(deploy_id: impl Into<String>) -> Result<Self, DeployIdError> {
        let deploy_id = DeployId::new(deploy_id)?;
        let name = StoreName(format!("{DEPLOY_STORE_PREFIX}{}", deploy_id.as_str()));
        Ok(Self::Deploy { deploy_id, name })
    }

    /// Name used on the wire and on disk
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Named(name) | Self::Deploy { name, .. } => name.as_str(),
        }
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One blob entry of a raw list page, as sent by the server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBlobEntry {
    pub etag: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// Body of a list response (one page)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub blobs: Vec<ListBlobEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Blob summary handed to callers of `list`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResultBlob {
    pub etag: String,
    pub key: String,
}

impl From<ListBlobEntry> for ListResultBlob {
    fn from(entry: ListBlobEntry) -> Self {
        Self {
            etag: entry.etag,
            key: entry.key,
        }
    }
}

/// Listing result: projected blobs plus derived directories
///
/// `next_cursor` is only set when a single page was fetched (manual or lazy
/// pagination); accumulated results always end without one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResult {
    pub blobs: Vec<ListResultBlob>,
    pub directories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl ListResult {
    /// Append a raw page, projecting each blob down to `{etag, key}`
    pub fn extend_from_page(&mut self, page: ListResponse) {
        self.blobs
            .extend(page.blobs.into_iter().map(ListResultBlob::from));
        self.directories
            .extend(page.directories.unwrap_or_default());
        self.next_cursor = page.next_cursor;
    }
}

impl From<ListResponse> for ListResult {
    fn from(page: ListResponse) -> Self {
        let mut result = Self::default();
        result.extend_from_page(page);
        result
    }
}
