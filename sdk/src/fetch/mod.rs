//! Ranged reads from the object store that holds archived files.

mod http;
mod retry;

pub use {
    http::{FetchConfig, HttpFetcher},
    retry::{RetryPolicy, ok_or_retry},
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    futures::{StreamExt, TryStreamExt, stream::BoxStream},
    rangecrypt_protocol::ByteRange,
    serde::Deserialize,
    std::fmt::{self, Debug},
    url::Url,
};

pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Where an archived object lives and how to authenticate to its store.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ObjectLocation {
    pub url: Url,
    /// `user:password` for Basic auth. Takes precedence over credentials in the URL.
    #[serde(default)]
    pub http_auth: Option<String>,
}

impl ObjectLocation {
    #[must_use]
    #[inline]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            http_auth: None,
        }
    }

    /// Store identity used in logs and errors. Never contains credentials or
    /// query parameters, which may hold signatures.
    #[must_use]
    #[inline]
    pub fn backend(&self) -> String {
        format!("{}{}", self.url.origin().ascii_serialization(), self.url.path())
    }

    /// Basic auth credentials, if any. Pre-signed URLs carry their own
    /// authorization and are never combined with Basic auth from the URL.
    #[must_use]
    #[inline]
    pub fn basic_auth(&self) -> Option<(String, Option<String>)> {
        if let Some(auth) = &self.http_auth {
            return Some(match auth.split_once(':') {
                Some((user, password)) => (user.to_owned(), Some(password.to_owned())),
                None => (auth.clone(), None),
            });
        }
        if self.url.username().is_empty() || self.url.as_str().contains("X-Amz") {
            return None;
        }
        Some((
            self.url.username().to_owned(),
            self.url.password().map(str::to_owned),
        ))
    }
}

impl Debug for ObjectLocation {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectLocation").field(&self.backend()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to fetch bytes {range} from {backend}: {kind}")]
pub struct FetchError {
    pub backend: String,
    pub range: ByteRange,
    pub kind: FetchErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchErrorKind {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("timed out")]
    Timeout,
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("response has no body")]
    EmptyBody,
    #[error("response ended after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },
    #[error("{0}")]
    Transport(String),
}

impl FetchErrorKind {
    /// Client errors reported by the store will not go away on retry.
    #[must_use]
    #[inline]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Status(status) if (400..500).contains(status))
    }
}

/// Source of stored bytes.
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Streams the inclusive `range` of the stored object.
    ///
    /// Implementations yield exactly `range.byte_count()` bytes or end the
    /// stream with an error.
    async fn fetch_range(
        &self,
        location: &ObjectLocation,
        range: ByteRange,
    ) -> Result<ByteStream, FetchError>;
}

/// Reads the whole range into memory.
#[inline]
pub async fn fetch_all(
    fetcher: &dyn RangeFetcher,
    location: &ObjectLocation,
    range: ByteRange,
) -> Result<Vec<u8>, FetchError> {
    let expected = range.byte_count();
    let chunks: Vec<Bytes> = fetcher
        .fetch_range(location, range)
        .await?
        .try_collect()
        .await?;
    let mut buf = Vec::with_capacity(usize::try_from(expected).unwrap_or_default());
    for chunk in chunks {
        buf.extend_from_slice(&chunk);
    }
    let received = u64::try_from(buf.len()).unwrap_or(u64::MAX);
    if received != expected {
        return Err(FetchError {
            backend: location.backend(),
            range,
            kind: if received == 0 {
                FetchErrorKind::EmptyBody
            } else {
                FetchErrorKind::Truncated { expected, received }
            },
        });
    }
    Ok(buf)
}

/// Wraps an in-memory buffer as a [`ByteStream`] of `chunk_len`-sized chunks.
#[must_use]
#[inline]
pub fn chunked_stream(data: Bytes, chunk_len: usize) -> ByteStream {
    let chunk_len = chunk_len.max(1);
    let chunks: Vec<Result<Bytes, FetchError>> = (0..data.len())
        .step_by(chunk_len)
        .map(|start| Ok(data.slice(start..data.len().min(start.saturating_add(chunk_len)))))
        .collect();
    futures::stream::iter(chunks).boxed()
}
