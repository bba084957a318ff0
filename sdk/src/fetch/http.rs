use {
    crate::fetch::{ByteStream, FetchError, FetchErrorKind, ObjectLocation, RangeFetcher},
    async_trait::async_trait,
    bytes::Buf,
    futures::StreamExt,
    rangecrypt_protocol::ByteRange,
    reqwest::{StatusCode, header::RANGE},
    serde::Deserialize,
    std::time::Duration,
    stream_generator::generate_try_stream,
    tokio::time::timeout,
    tracing::{debug, instrument},
};

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    /// Limit for the response head and for each body chunk.
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for FetchConfig {
    #[inline]
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
        }
    }
}

/// Fetches ranges over HTTP(S) using a pooled client.
///
/// Reuse created fetcher or clone it in order to reuse a connection pool.
#[derive(Clone)]
pub struct HttpFetcher {
    reqwest: reqwest::Client,
    read_timeout: Duration,
}

impl HttpFetcher {
    #[inline]
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        Ok(Self {
            reqwest: reqwest::Client::builder()
                .connect_timeout(config.connect_timeout)
                .pool_idle_timeout(POOL_IDLE_TIMEOUT)
                .tcp_keepalive(TCP_KEEPALIVE)
                .build()?,
            read_timeout: config.read_timeout,
        })
    }
}

fn classify(err: &reqwest::Error) -> FetchErrorKind {
    if err.is_timeout() {
        FetchErrorKind::Timeout
    } else if err.is_connect() {
        FetchErrorKind::Connect(err.to_string())
    } else if let Some(status) = err.status() {
        FetchErrorKind::Status(status.as_u16())
    } else {
        FetchErrorKind::Transport(err.to_string())
    }
}

#[async_trait]
impl RangeFetcher for HttpFetcher {
    #[instrument(skip_all, fields(backend = %location.backend(), %range))]
    async fn fetch_range(
        &self,
        location: &ObjectLocation,
        range: ByteRange,
    ) -> Result<ByteStream, FetchError> {
        let backend = location.backend();
        let error = move |kind| FetchError {
            backend: backend.clone(),
            range,
            kind,
        };

        let mut url = location.url.clone();
        // Credentials are sent explicitly below, never implicitly from the URL.
        url.set_username("").ok();
        url.set_password(None).ok();
        let mut request = self
            .reqwest
            .get(url)
            .header(RANGE, format!("bytes={}-{}", range.start, range.end));
        if let Some((user, password)) = location.basic_auth() {
            request = request.basic_auth(user, password);
        }

        let mut response = timeout(self.read_timeout, request.send())
            .await
            .map_err(|_elapsed| error(FetchErrorKind::Timeout))?
            .map_err(|err| error(classify(&err)))?;
        // Stores that ignore the Range header answer 200 with the whole object.
        let mut to_skip = match response.status() {
            StatusCode::PARTIAL_CONTENT => 0,
            StatusCode::OK => range.start,
            status => return Err(error(FetchErrorKind::Status(status.as_u16()))),
        };
        debug!(status = %response.status(), to_skip, "range response");

        let read_timeout = self.read_timeout;
        let expected = range.byte_count();
        let stream = generate_try_stream(move |mut y| async move {
            let mut remaining = expected;
            while remaining > 0 {
                let chunk = timeout(read_timeout, response.chunk())
                    .await
                    .map_err(|_elapsed| error(FetchErrorKind::Timeout))?
                    .map_err(|err| error(classify(&err)))?;
                let Some(mut chunk) = chunk else {
                    let received = expected - remaining;
                    return Err(error(if received == 0 {
                        FetchErrorKind::EmptyBody
                    } else {
                        FetchErrorKind::Truncated { expected, received }
                    }));
                };
                let chunk_len = u64::try_from(chunk.len()).unwrap_or(u64::MAX);
                if to_skip > 0 {
                    let skipped = to_skip.min(chunk_len);
                    chunk.advance(usize::try_from(skipped).unwrap_or(chunk.len()));
                    to_skip -= skipped;
                }
                let chunk_len = u64::try_from(chunk.len()).unwrap_or(u64::MAX);
                if chunk_len > remaining {
                    chunk.truncate(usize::try_from(remaining).unwrap_or(chunk.len()));
                }
                remaining -= chunk_len.min(remaining);
                if !chunk.is_empty() {
                    y.send(Ok(chunk)).await;
                }
            }
            Ok(())
        });
        Ok(stream.boxed())
    }
}
