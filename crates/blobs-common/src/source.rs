//! Byte sources for blob payloads

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Boxed stream of payload chunks
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Payload of a blob write
///
/// All variants are consumed through [`BlobSource::write_to`], so writers
/// never branch on the input shape.
pub enum BlobSource {
    Text(String),
    Bytes(Bytes),
    Stream(ByteStream),
}

impl BlobSource {
    /// Wrap a chunk stream
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }

    /// Write the whole source to `sink`, returning the number of bytes written
    pub async fn write_to<W>(self, sink: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let written = match self {
            Self::Text(text) => {
                sink.write_all(text.as_bytes()).await?;
                text.len() as u64
            }
            Self::Bytes(bytes) => {
                sink.write_all(&bytes).await?;
                bytes.len() as u64
            }
            Self::Stream(mut stream) => {
                let mut total = 0u64;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    sink.write_all(&chunk).await?;
                    total += chunk.len() as u64;
                }
                total
            }
        };
        sink.flush().await?;
        Ok(written)
    }

    /// Collect the source into a single buffer
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            Self::Text(text) => Ok(Bytes::from(text)),
            Self::Bytes(bytes) => Ok(bytes),
            Self::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for BlobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<String> for BlobSource {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for BlobSource {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Bytes> for BlobSource {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for BlobSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}
