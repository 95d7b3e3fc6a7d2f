//! Request addressing
//!
//! A [`Client`] turns a logical store request into one or two HTTP
//! exchanges:
//!
//! - **Edge mode** (`edge_url` configured): a single request to
//!   `{edge}/{site}/{store}/{key}` carrying the bearer token.
//! - **Control-plane mode**: a request to
//!   `{api}/api/v1/sites/{site}/blobs/{key}?context={store}` that answers
//!   `{"url": ...}`, followed by the payload transfer against that URL
//!   without the bearer token. A control response that already carries a
//!   list page is used as-is.
//!
//! Every exchange goes through the retry transport.

use crate::retry::RetryTransport;
use crate::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use blobs_common::metadata::{METADATA_HEADER_EXTERNAL, METADATA_HEADER_INTERNAL};
use blobs_common::{BlobKey, ClientConfig, ConsistencyMode, Error, Result, Store};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// One logical request against a store
#[derive(Clone, Debug)]
pub struct BlobRequest<'a> {
    pub method: Method,
    pub store: &'a Store,
    /// `None` addresses the store itself (listing)
    pub key: Option<&'a BlobKey>,
    pub body: Option<Bytes>,
    /// Headers for the storage hop
    pub headers: HeaderMap,
    /// Encoded metadata header value
    pub metadata: Option<String>,
    pub parameters: Vec<(&'static str, String)>,
    pub consistency: Option<ConsistencyMode>,
}

impl<'a> BlobRequest<'a> {
    pub fn new(method: Method, store: &'a Store) -> Self {
        Self {
            method,
            store,
            key: None,
            body: None,
            headers: HeaderMap::new(),
            metadata: None,
            parameters: Vec::new(),
            consistency: None,
        }
    }

    #[must_use]
    pub const fn key(mut self, key: &'a BlobKey) -> Self {
        self.key = Some(key);
        self
    }

    #[must_use]
    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn metadata(mut self, encoded: Option<String>) -> Self {
        self.metadata = encoded;
        self
    }

    #[must_use]
    pub fn parameter(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.parameters.push((name, value.into()));
        self
    }

    #[must_use]
    pub const fn consistency(mut self, consistency: Option<ConsistencyMode>) -> Self {
        self.consistency = consistency;
        self
    }
}

/// Body of a control-plane answer pointing at storage
#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    url: String,
}

/// Client for the blobs protocol
pub struct Client {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
}

impl Client {
    /// Create a client using `reqwest` as the underlying transport
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_transport(config, ReqwestTransport::new())
    }

    /// Create a client over a custom transport
    ///
    /// The transport is wrapped in a [`RetryTransport`] using the
    /// configured retry policy.
    pub fn with_transport<T>(config: ClientConfig, transport: T) -> Result<Self>
    where
        T: Transport + 'static,
    {
        config.validate()?;
        let transport: Arc<dyn Transport> =
            Arc::new(RetryTransport::new(transport, config.retry.clone()));
        Ok(Self { config, transport })
    }

    /// Get the client configuration
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a store request, following the control-plane hop if needed
    pub async fn send(&self, request: BlobRequest<'_>) -> Result<HttpResponse> {
        match &self.config.edge_url {
            Some(edge_url) => {
                let http_request = self.edge_request(edge_url, request)?;
                self.transport.send(http_request).await
            }
            None => self.send_via_control_plane(request).await,
        }
    }

    fn edge_request(&self, edge_url: &str, request: BlobRequest<'_>) -> Result<HttpRequest> {
        let consistency = request.consistency.unwrap_or(self.config.consistency);
        let base = match consistency {
            ConsistencyMode::Eventual => edge_url,
            ConsistencyMode::Strong => self
                .config
                .uncached_edge_url
                .as_deref()
                .ok_or(Error::ConsistencyConfiguration)?,
        };

        let mut path = format!(
            "{}/{}/{}",
            base.trim_end_matches('/'),
            urlencoding::encode(&self.config.site_id),
            urlencoding::encode(request.store.name())
        );
        if let Some(key) = request.key {
            path.push('/');
            path.push_str(&urlencoding::encode(key.as_str()));
        }
        let url = with_parameters(&path, &request.parameters)?;

        let mut headers = request.headers;
        headers.insert(header::AUTHORIZATION, self.bearer()?);
        if let Some(metadata) = &request.metadata {
            headers.insert(METADATA_HEADER_EXTERNAL, header_value(metadata)?);
        }

        Ok(HttpRequest {
            method: request.method,
            url,
            headers,
            body: request.body,
        })
    }

    async fn send_via_control_plane(&self, request: BlobRequest<'_>) -> Result<HttpResponse> {
        let mut path = format!(
            "{}/api/v1/sites/{}/blobs",
            self.config.api_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.site_id)
        );
        if let Some(key) = request.key {
            path.push('/');
            path.push_str(&urlencoding::encode(key.as_str()));
        }

        let mut parameters = vec![("context", request.store.name().to_string())];
        parameters.extend(request.parameters.iter().cloned());

        // A HEAD answer cannot carry the signed URL, so ask for a read URL
        let control_method = if request.method == Method::HEAD {
            Method::GET
        } else {
            request.method.clone()
        };

        let mut control = HttpRequest::new(control_method, with_parameters(&path, &parameters)?);
        control.headers.insert(header::AUTHORIZATION, self.bearer()?);
        if let Some(metadata) = &request.metadata {
            control
                .headers
                .insert(METADATA_HEADER_EXTERNAL, header_value(metadata)?);
        }

        let response = self.transport.send(control).await?;
        if response.status != StatusCode::OK {
            return Ok(response);
        }

        let Ok(signed) = serde_json::from_slice::<SignedUrlResponse>(&response.body) else {
            // Listing may be answered directly by the control plane
            return Ok(response);
        };
        debug!("following signed URL for {} {}", request.method, path);

        let mut headers = request.headers;
        if let Some(metadata) = &request.metadata {
            headers.insert(METADATA_HEADER_INTERNAL, header_value(metadata)?);
        }

        self.transport
            .send(HttpRequest {
                method: request.method,
                url: signed.url,
                headers,
                body: request.body,
            })
            .await
    }

    fn bearer(&self) -> Result<HeaderValue> {
        header_value(&format!("Bearer {}", self.config.token))
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::invalid_argument(format!("invalid header value: {e}")))
}

fn with_parameters(base: &str, parameters: &[(&'static str, String)]) -> Result<String> {
    let mut url = Url::parse(base)
        .map_err(|e| Error::configuration(format!("invalid URL {base}: {e}")))?;
    if !parameters.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in parameters {
            pairs.append_pair(name, value);
        }
    }
    Ok(url.to_string())
}
