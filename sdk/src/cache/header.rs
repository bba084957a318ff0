use {
    crate::{
        cache::{Cached, flight::InFlight},
        content::{CipherHeader, FileHandle},
        crypto::{CipherKey, Iv},
        error::TransferError,
        fetch::{FetchError, FetchErrorKind, RangeFetcher, RetryPolicy, fetch_all, ok_or_retry},
    },
    futures::FutureExt,
    parking_lot::Mutex,
    rangecrypt_protocol::{AES_HEADER_LEN, ByteRange, FileId},
    std::{collections::HashMap, sync::Arc, time::Duration},
    tracing::{debug, info},
};

#[derive(Debug, Clone, Copy)]
pub struct HeaderStoreConfig {
    pub ttl: Duration,
    pub retry: RetryPolicy,
    /// Bytes stored before the IV.
    pub integrity_prefix: u64,
}

impl Default for HeaderStoreConfig {
    #[inline]
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            retry: RetryPolicy::default(),
            integrity_prefix: 0,
        }
    }
}

/// Per-file decryption headers, loaded once and reused until they expire.
#[derive(Clone)]
pub struct HeaderStore {
    inner: Arc<Inner>,
}

struct Inner {
    fetcher: Arc<dyn RangeFetcher>,
    config: HeaderStoreConfig,
    state: Mutex<State>,
}

struct State {
    headers: HashMap<FileId, Cached<CipherHeader>>,
    loading: InFlight<FileId, CipherHeader>,
}

impl HeaderStore {
    #[must_use]
    #[inline]
    pub fn new(fetcher: Arc<dyn RangeFetcher>, config: HeaderStoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                config,
                state: Mutex::new(State {
                    headers: HashMap::new(),
                    loading: InFlight::new(),
                }),
            }),
        }
    }

    /// Returns the header of an AES-encrypted file, loading it on first use.
    #[inline]
    pub async fn get(&self, file: &FileHandle) -> Result<Arc<CipherHeader>, TransferError> {
        let load = {
            let mut state = self.inner.state.lock();
            if let Some(cached) = state.headers.get(&file.id) {
                if cached.is_fresh(self.inner.config.ttl) {
                    return Ok(Arc::clone(&cached.value));
                }
                debug!(file_id = %file.id, "header expired");
                state.headers.remove(&file.id);
            }
            if let Some(load) = state.loading.get(&file.id) {
                load
            } else {
                let inner = Arc::clone(&self.inner);
                let id = file.id.clone();
                let file = file.clone();
                state.loading.start(id, move |ticket| {
                    async move {
                        let result = inner.load(&file).await.map(Arc::new);
                        let mut state = inner.state.lock();
                        let current = state.loading.finish(&file.id, ticket);
                        match &result {
                            Ok(header) if current => {
                                state
                                    .headers
                                    .insert(file.id.clone(), Cached::new(Arc::clone(header)));
                            }
                            Ok(_) => debug!(file_id = %file.id, "header invalidated while loading"),
                            Err(_) => {}
                        }
                        result
                    }
                    .boxed()
                })
            }
        };
        load.await
    }

    /// Drops the cached header so the next request reloads it. A load in
    /// progress is not published.
    #[inline]
    pub fn invalidate(&self, file_id: &FileId) {
        let mut state = self.inner.state.lock();
        let removed = state.headers.remove(file_id).is_some();
        let cancelled = state.loading.cancel(|id| id == file_id);
        if removed || cancelled > 0 {
            info!(%file_id, "header invalidated");
        }
    }

    #[must_use]
    #[inline]
    pub fn is_cached(&self, file_id: &FileId) -> bool {
        self.inner.state.lock().headers.contains_key(file_id)
    }
}

impl Inner {
    async fn load(&self, file: &FileHandle) -> Result<CipherHeader, TransferError> {
        let bits = file.format.aes_bits().ok_or_else(|| {
            TransferError::Unsupported(format!("{} has no cipher header", file.format))
        })?;
        let material = file
            .key
            .as_ref()
            .ok_or_else(|| TransferError::InvalidKey(format!("no key recorded for {}", file.id)))?;
        let key = CipherKey::from_material(material, bits)?;

        let prefix = self.config.integrity_prefix;
        let range = ByteRange::new(prefix, prefix.saturating_add(15));
        let bytes = ok_or_retry(self.config.retry, || {
            fetch_all(&*self.fetcher, &file.location, range)
        })
        .await?;
        let iv: Iv = bytes.as_slice().try_into().map_err(|_mismatch| FetchError {
            backend: file.location.backend(),
            range,
            kind: FetchErrorKind::Truncated {
                expected: range.byte_count(),
                received: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            },
        })?;
        debug!(file_id = %file.id, "header loaded");
        Ok(CipherHeader {
            file_id: file.id.clone(),
            location: file.location.clone(),
            iv,
            key,
            data_offset: prefix.saturating_add(AES_HEADER_LEN),
            plain_size: file.plain_size(),
        })
    }
}
