//! Store façade
//!
//! [`BlobStore`] validates keys and options locally, then dispatches to the
//! client. Validation and metadata size errors are raised before any
//! request is made. A 404 on a read is a "not found" result, not an error.

use crate::client::{BlobRequest, Client};
use crate::list::{self, ListOptions};
use crate::response::{BlobBody, ResponseType};
use crate::transport::HttpResponse;
use blobs_common::metadata::{self, Metadata};
use blobs_common::{BlobKey, BlobSource, ConsistencyMode, Error, ListResult, Result, Store};
use futures::stream::{self, Stream, StreamExt};
use http::{HeaderValue, Method, StatusCode, header};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Header carrying a blob's expiry time, in epoch milliseconds
pub const EXPIRES_AT_HEADER: &str = "x-nf-expires-at";

/// Cache policy forced on every write
pub const WRITE_CACHE_CONTROL: &str = "max-age=0, stale-while-revalidate=60";

/// Default width of the bulk write worker pool
pub const DEFAULT_WRITE_CONCURRENCY: usize = 5;

/// Options for a write
#[derive(Clone, Debug, Default)]
pub struct SetOptions {
    pub metadata: Option<Metadata>,
    /// Expiry time in epoch milliseconds; checked by readers only
    pub expires_at: Option<i64>,
}

/// Options for a read
#[derive(Clone, Debug, Default)]
pub struct GetOptions {
    pub response_type: ResponseType,
    pub consistency: Option<ConsistencyMode>,
    /// Known ETag; a match short-circuits the body fetch
    pub etag: Option<String>,
}

/// Metadata of a blob, without its body
#[derive(Clone, Debug, PartialEq)]
pub struct BlobMetadata {
    pub etag: Option<String>,
    pub metadata: Metadata,
}

/// A blob body with its metadata
#[derive(Debug)]
pub struct BlobWithMetadata {
    /// `None` when the caller's ETag is still fresh
    pub data: Option<BlobBody>,
    pub etag: Option<String>,
    pub metadata: Metadata,
    pub fresh: bool,
}

/// Handle on one store
#[derive(Clone)]
pub struct BlobStore {
    client: Arc<Client>,
    store: Store,
}

impl BlobStore {
    pub const fn new(client: Arc<Client>, store: Store) -> Self {
        Self { client, store }
    }

    /// Get the store this handle addresses
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Read a blob; `None` when absent or expired
    pub async fn get(&self, key: &str, response_type: ResponseType) -> Result<Option<BlobBody>> {
        let options = GetOptions {
            response_type,
            ..GetOptions::default()
        };
        Ok(self
            .get_with_metadata(key, &options)
            .await?
            .and_then(|blob| blob.data))
    }

    /// Read a blob along with its ETag and metadata
    pub async fn get_with_metadata(
        &self,
        key: &str,
        options: &GetOptions,
    ) -> Result<Option<BlobWithMetadata>> {
        let key = BlobKey::new(key)?;
        let mut request = BlobRequest::new(Method::GET, &self.store)
            .key(&key)
            .consistency(options.consistency);
        if let Some(etag) = &options.etag {
            request = request.header(header::IF_NONE_MATCH, header_value(etag)?);
        }

        let response = self.client.send(request).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let fresh = response.status == StatusCode::NOT_MODIFIED;
        if !fresh && !response.status.is_success() {
            return Err(Error::upstream("get", response.status.as_u16()));
        }
        if is_expired(&response) {
            debug!("blob {} in {} has expired", key, self.store);
            return Ok(None);
        }

        let etag = response.header(header::ETAG.as_str()).map(ToString::to_string);
        let metadata = metadata::from_headers(&response.headers)?;
        let data = if fresh {
            None
        } else {
            Some(options.response_type.convert(response)?)
        };

        Ok(Some(BlobWithMetadata {
            data,
            etag,
            metadata,
            fresh,
        }))
    }

    /// Read only the ETag and metadata of a blob
    pub async fn get_metadata(
        &self,
        key: &str,
        consistency: Option<ConsistencyMode>,
    ) -> Result<Option<BlobMetadata>> {
        let key = BlobKey::new(key)?;
        let request = BlobRequest::new(Method::HEAD, &self.store)
            .key(&key)
            .consistency(consistency);

        let response = self.client.send(request).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status.is_success() {
            return Err(Error::upstream("get metadata", response.status.as_u16()));
        }
        if is_expired(&response) {
            return Ok(None);
        }

        Ok(Some(BlobMetadata {
            etag: response.header(header::ETAG.as_str()).map(ToString::to_string),
            metadata: metadata::from_headers(&response.headers)?,
        }))
    }

    /// Write a blob
    pub async fn set(&self, key: &str, source: impl Into<BlobSource>, options: &SetOptions) -> Result<()> {
        let key = BlobKey::new(key)?;
        let encoded = metadata::encode(options.metadata.as_ref())?;
        let body = source.into().into_bytes().await?;

        let mut request = BlobRequest::new(Method::PUT, &self.store)
            .key(&key)
            .body(body)
            .metadata(encoded)
            .header(
                header::CACHE_CONTROL,
                HeaderValue::from_static(WRITE_CACHE_CONTROL),
            );
        if let Some(expires_at) = options.expires_at {
            request = request.header(
                header::HeaderName::from_static(EXPIRES_AT_HEADER),
                HeaderValue::from(expires_at),
            );
        }

        let response = self.client.send(request).await?;
        if !response.status.is_success() {
            return Err(Error::upstream("set", response.status.as_u16()));
        }
        info!("stored blob {} in {}", key, self.store);
        Ok(())
    }

    /// Write a value serialized as JSON
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: &SetOptions,
    ) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.set(key, body, options).await
    }

    /// Write several independent blobs through a bounded worker pool
    ///
    /// Results are returned in input order.
    pub async fn set_many<I, S>(&self, items: I, concurrency: usize) -> Vec<Result<()>>
    where
        I: IntoIterator<Item = (String, S, SetOptions)>,
        S: Into<BlobSource>,
    {
        let items: Vec<(String, BlobSource, SetOptions)> = items
            .into_iter()
            .map(|(key, source, options)| (key, source.into(), options))
            .collect();

        stream::iter(items)
            .map(|(key, source, options)| async move { self.set(&key, source, &options).await })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    /// Delete a blob; deleting a missing blob succeeds
    pub async fn delete(&self, key: &str) -> Result<()> {
        let key = BlobKey::new(key)?;
        let response = self
            .client
            .send(BlobRequest::new(Method::DELETE, &self.store).key(&key))
            .await?;

        if response.status.is_success() || response.status == StatusCode::NOT_FOUND {
            info!("deleted blob {} from {}", key, self.store);
            return Ok(());
        }
        Err(Error::upstream("delete", response.status.as_u16()))
    }

    /// List blobs (accumulate mode, or manual mode with a cursor)
    pub async fn list(&self, options: &ListOptions) -> Result<ListResult> {
        list::list(&self.client, &self.store, options).await
    }

    /// List blobs lazily, one request per pulled page
    pub fn list_pages(&self, options: ListOptions) -> impl Stream<Item = Result<ListResult>> + Send + 'static {
        list::list_pages(self.client.clone(), self.store.clone(), options)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::invalid_argument(format!("invalid header value: {e}")))
}

/// Whether the response carries an expiry time that has passed
fn is_expired(response: &HttpResponse) -> bool {
    response
        .header(EXPIRES_AT_HEADER)
        .and_then(|v| v.parse::<i64>().ok())
        .is_some_and(|expires_at| chrono::Utc::now().timestamp_millis() >= expires_at)
}
