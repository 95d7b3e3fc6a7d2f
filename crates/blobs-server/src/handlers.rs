//! HTTP handlers
//!
//! Direct storage routes (`/{site}/{store}/{key}`) serve blob bytes and
//! listings. Control-plane routes (`/api/v1/sites/{site}/blobs/{key}`)
//! answer with a signed URL pointing back at the direct route.

use crate::auth::{SIGNATURE_PARAM, sign, verb};
use crate::error::{Result, ServerError};
use crate::storage::{BlobPath, LocalStorage, StoredMetadata};
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use blobs_common::metadata::{self, METADATA_HEADER_EXTERNAL};
use blobs_common::{BlobKey, BlobSource};
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use std::io;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// Header carrying a blob's expiry time, in epoch milliseconds
pub const EXPIRES_AT_HEADER: &str = "x-nf-expires-at";

/// Shared state for request handlers
pub struct AppState {
    pub storage: LocalStorage,
    /// Static bearer token; `None` trusts every request
    pub token: Option<String>,
    /// Base URL advertised in signed URLs
    pub base_url: String,
}

impl AppState {
    /// Build a direct storage URL, signed when a token is configured
    fn signed_url(
        &self,
        method: &Method,
        site: &str,
        store: &str,
        key: Option<&BlobKey>,
        parameters: &[(&str, &str)],
    ) -> String {
        let mut path = format!(
            "/{}/{}",
            urlencoding::encode(site),
            urlencoding::encode(store)
        );
        if let Some(key) = key {
            path.push('/');
            path.push_str(&urlencoding::encode(key.as_str()));
        }

        let mut query: Vec<String> = parameters
            .iter()
            .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
            .collect();
        if let Some(token) = &self.token {
            query.push(format!("{SIGNATURE_PARAM}={}", sign(token, verb(method), &path)));
        }

        let mut url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }
}

/// Query parameters of a list request
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub prefix: Option<String>,
    /// Accepted for compatibility; every listing is a single page
    pub cursor: Option<String>,
    pub directories: Option<String>,
}

impl ListQuery {
    fn directories(&self) -> bool {
        self.directories.as_deref() == Some("true")
    }
}

/// Query parameters of a control-plane request
#[derive(Debug, Default, Deserialize)]
pub struct ControlQuery {
    pub context: Option<String>,
    #[serde(flatten)]
    pub list: ListQuery,
}

impl ControlQuery {
    fn store(&self) -> Result<&str> {
        self.context
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ServerError::bad_request("missing store context"))
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| ServerError::internal(e.to_string()))
}

/// Headers describing a stored blob
fn blob_headers(size: u64, stored: &StoredMetadata) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(
        header::ETAG,
        header_value(&format!("\"{}\"", uuid::Uuid::new_v4()))?,
    );

    if !stored.metadata.is_empty()
        && let Some(encoded) = metadata::encode(Some(&stored.metadata))?
    {
        headers.insert(METADATA_HEADER_EXTERNAL, header_value(&encoded)?);
    }
    if let Some(expires_at) = stored.expires_at {
        headers.insert(
            HeaderName::from_static(EXPIRES_AT_HEADER),
            HeaderValue::from(expires_at),
        );
    }
    Ok(headers)
}

/// Metadata record carried by a write request
fn stored_metadata(headers: &HeaderMap) -> Result<StoredMetadata> {
    let expires_at = headers
        .get(EXPIRES_AT_HEADER)
        .map(|v| {
            v.to_str()
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .ok_or_else(|| ServerError::bad_request("invalid expiration header"))
        })
        .transpose()?;

    Ok(StoredMetadata {
        metadata: metadata::from_headers(headers)?,
        expires_at,
    })
}

/// Health check endpoint (GET /health)
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// List a store (GET /{site}/{store})
pub async fn list_blobs(
    State(state): State<Arc<AppState>>,
    Path((site, store)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let prefix = query.prefix.as_deref().unwrap_or_default();
    let page = state
        .storage
        .list(&site, &store, prefix, query.directories())
        .await?;
    debug!(
        "listed {}/{} with prefix {:?}: {} blobs",
        site,
        store,
        prefix,
        page.blobs.len()
    );
    Ok(Json(page).into_response())
}

/// Read a blob (GET /{site}/{store}/{key})
pub async fn get_blob(
    State(state): State<Arc<AppState>>,
    Path((site, store, key)): Path<(String, String, String)>,
) -> Result<Response> {
    let key = BlobKey::new(key).map_err(blobs_common::Error::from)?;
    let blob = BlobPath {
        site: &site,
        store: &store,
        key: &key,
    };

    let stored = state.storage.get(&blob).await?.ok_or(ServerError::NotFound)?;
    let headers = blob_headers(stored.size, &stored.metadata)?;
    let body = Body::from_stream(ReaderStream::new(stored.file));
    Ok((StatusCode::OK, headers, body).into_response())
}

/// Read blob metadata (HEAD /{site}/{store}/{key})
pub async fn head_blob(
    State(state): State<Arc<AppState>>,
    Path((site, store, key)): Path<(String, String, String)>,
) -> Result<Response> {
    let key = BlobKey::new(key).map_err(blobs_common::Error::from)?;
    let blob = BlobPath {
        site: &site,
        store: &store,
        key: &key,
    };

    let (size, stored) = state.storage.head(&blob).await?.ok_or(ServerError::NotFound)?;
    Ok((StatusCode::OK, blob_headers(size, &stored)?).into_response())
}

/// Write a blob (PUT /{site}/{store}/{key})
pub async fn put_blob(
    State(state): State<Arc<AppState>>,
    Path((site, store, key)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    let key = BlobKey::new(key).map_err(blobs_common::Error::from)?;
    let blob = BlobPath {
        site: &site,
        store: &store,
        key: &key,
    };

    let stored = stored_metadata(&headers)?;
    let source = BlobSource::from_stream(body.into_data_stream().map_err(io::Error::other));
    let size = state.storage.put(&blob, source, stored).await?;

    info!("stored {}/{}/{} ({} bytes)", site, store, key, size);
    Ok(StatusCode::OK.into_response())
}

/// Delete a blob (DELETE /{site}/{store}/{key})
pub async fn delete_blob(
    State(state): State<Arc<AppState>>,
    Path((site, store, key)): Path<(String, String, String)>,
) -> Result<Response> {
    let key = BlobKey::new(key).map_err(blobs_common::Error::from)?;
    let blob = BlobPath {
        site: &site,
        store: &store,
        key: &key,
    };

    if state.storage.delete(&blob).await? {
        info!("deleted {}/{}/{}", site, store, key);
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Ok(StatusCode::NOT_FOUND.into_response())
    }
}

/// Mint a signed URL for a blob (`/api/v1/sites/{site}/blobs/{key}?context={store}`)
pub async fn control_blob(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path((site, key)): Path<(String, String)>,
    Query(query): Query<ControlQuery>,
) -> Result<Json<serde_json::Value>> {
    let store = query.store()?;
    let key = BlobKey::new(key).map_err(blobs_common::Error::from)?;

    let url = state.signed_url(&method, &site, store, Some(&key), &[]);
    debug!("signed {} URL for {}/{}/{}", verb(&method), site, store, key);
    Ok(Json(json!({ "url": url })))
}

/// Mint a signed URL for a listing (`/api/v1/sites/{site}/blobs?context={store}`)
pub async fn control_list(
    State(state): State<Arc<AppState>>,
    Path(site): Path<String>,
    Query(query): Query<ControlQuery>,
) -> Result<Json<serde_json::Value>> {
    let store = query.store()?;

    let mut parameters = Vec::new();
    if let Some(prefix) = query.list.prefix.as_deref() {
        parameters.push(("prefix", prefix));
    }
    if let Some(cursor) = query.list.cursor.as_deref() {
        parameters.push(("cursor", cursor));
    }
    if query.list.directories() {
        parameters.push(("directories", "true"));
    }

    let url = state.signed_url(&Method::GET, &site, store, None, &parameters);
    Ok(Json(json!({ "url": url })))
}
