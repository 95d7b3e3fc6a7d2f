//! Metadata header codec
//!
//! Blob metadata is an arbitrary JSON object carried in a single HTTP
//! header as `b64;<base64(json)>`. Two header names exist, one per hop:
//! the external one between clients and the edge/control plane, and the
//! internal one between the control plane and storage. Readers accept
//! either and prefer the external one.

use crate::error::{Error, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use http::HeaderMap;
use serde_json::{Map, Value};

/// Blob metadata: a JSON object
pub type Metadata = Map<String, Value>;

/// Header used between clients and the edge or control plane
pub const METADATA_HEADER_EXTERNAL: &str = "netlify-blobs-metadata";

/// Header used between the control plane and storage
pub const METADATA_HEADER_INTERNAL: &str = "x-amz-meta-user";

/// Maximum size of header name plus encoded payload
pub const METADATA_MAX_SIZE: usize = 2048;

const BASE64_PREFIX: &str = "b64;";

/// Encode metadata into a header value
///
/// Returns `None` when there is no metadata to send. Fails with
/// [`Error::MetadataTooLarge`] before any I/O when the header would not fit.
pub fn encode(metadata: Option<&Metadata>) -> Result<Option<String>> {
    let Some(metadata) = metadata else {
        return Ok(None);
    };

    let json = serde_json::to_vec(metadata)?;
    let payload = format!("{BASE64_PREFIX}{}", BASE64.encode(json));
    let size = METADATA_HEADER_EXTERNAL.len() + payload.len();

    if size > METADATA_MAX_SIZE {
        return Err(Error::MetadataTooLarge {
            size,
            max: METADATA_MAX_SIZE,
        });
    }

    Ok(Some(payload))
}

/// Decode a header value into metadata
///
/// Absent or foreign (untagged) values decode to an empty object. A tagged
/// value that is not valid base64 JSON object is a hard error.
pub fn decode(header: Option<&str>) -> Result<Metadata> {
    let Some(encoded) = header.and_then(|h| h.strip_prefix(BASE64_PREFIX)) else {
        return Ok(Metadata::new());
    };

    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| Error::MetadataDecode(e.to_string()))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::MetadataDecode(format!(
            "expected a JSON object, found {other}"
        ))),
        Err(e) => Err(Error::MetadataDecode(e.to_string())),
    }
}

/// Find the encoded metadata header, preferring the external name
#[must_use]
pub fn header_value(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(METADATA_HEADER_EXTERNAL)
        .or_else(|| headers.get(METADATA_HEADER_INTERNAL))
        .and_then(|v| v.to_str().ok())
}

/// Decode metadata from whichever metadata header is present
pub fn from_headers(headers: &HeaderMap) -> Result<Metadata> {
    decode(header_value(headers))
}
