//! Typed blob bodies
//!
//! Callers pick the shape of a read with [`ResponseType`]; each variant has
//! exactly one conversion from the raw response.

use crate::transport::HttpResponse;
use blobs_common::source::ByteStream;
use blobs_common::{Error, Result};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use http::header;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Requested shape of a blob read
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseType {
    ArrayBuffer,
    Blob,
    Json,
    Stream,
    #[default]
    Text,
}

impl ResponseType {
    /// Convert a successful response into the requested body shape
    pub fn convert(self, response: HttpResponse) -> Result<BlobBody> {
        match self {
            Self::ArrayBuffer => Ok(to_array_buffer(response)),
            Self::Blob => Ok(to_blob(response)),
            Self::Json => to_json(response),
            Self::Stream => Ok(to_stream(response)),
            Self::Text => Ok(to_text(response)),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ArrayBuffer => "arrayBuffer",
            Self::Blob => "blob",
            Self::Json => "json",
            Self::Stream => "stream",
            Self::Text => "text",
        }
    }
}

impl FromStr for ResponseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "arrayBuffer" => Ok(Self::ArrayBuffer),
            "blob" => Ok(Self::Blob),
            "json" => Ok(Self::Json),
            "stream" => Ok(Self::Stream),
            "text" => Ok(Self::Text),
            other => Err(Error::invalid_argument(format!(
                "invalid response type: {other}"
            ))),
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a blob read, shaped per [`ResponseType`]
pub enum BlobBody {
    ArrayBuffer(Bytes),
    Blob {
        data: Bytes,
        content_type: Option<String>,
    },
    Json(Value),
    Stream(ByteStream),
    Text(String),
}

impl BlobBody {
    /// Text content, if this is a text body
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// JSON content, if this is a JSON body
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Raw bytes, if this is a buffered binary body
    #[must_use]
    pub const fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::ArrayBuffer(data) | Self::Blob { data, .. } => Some(data),
            _ => None,
        }
    }
}

impl fmt::Debug for BlobBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArrayBuffer(data) => f.debug_tuple("ArrayBuffer").field(&data.len()).finish(),
            Self::Blob { data, content_type } => f
                .debug_struct("Blob")
                .field("len", &data.len())
                .field("content_type", content_type)
                .finish(),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
        }
    }
}

fn to_array_buffer(response: HttpResponse) -> BlobBody {
    BlobBody::ArrayBuffer(response.body)
}

fn to_blob(response: HttpResponse) -> BlobBody {
    let content_type = response
        .header(header::CONTENT_TYPE.as_str())
        .map(ToString::to_string);
    BlobBody::Blob {
        data: response.body,
        content_type,
    }
}

fn to_json(response: HttpResponse) -> Result<BlobBody> {
    Ok(BlobBody::Json(serde_json::from_slice(&response.body)?))
}

fn to_stream(response: HttpResponse) -> BlobBody {
    BlobBody::Stream(stream::once(async move { Ok(response.body) }).boxed())
}

fn to_text(response: HttpResponse) -> BlobBody {
    BlobBody::Text(String::from_utf8_lossy(&response.body).into_owned())
}
