use {
    crate::{
        cache::{
            Cached,
            flight::{InFlight, Load},
        },
        content::{CachePage, CipherHeader, PageKey},
        crypto::CounterCipher,
        error::TransferError,
        fetch::{RangeFetcher, fetch_all},
    },
    futures::FutureExt,
    lru::LruCache,
    parking_lot::Mutex,
    rangecrypt_protocol::{ByteRange, FileId},
    std::{num::NonZeroUsize, sync::Arc, time::Duration},
    tracing::{debug, trace},
};

#[derive(Debug, Clone, Copy)]
pub struct PageCacheConfig {
    /// Plaintext bytes per page. A multiple of the cipher block size.
    pub page_size: u64,
    pub capacity: NonZeroUsize,
    pub ttl: Duration,
    /// Pages after the requested one that are loaded in the background.
    pub prefetch: u64,
}

/// Decrypted pages of AES-encrypted files, keyed by file and page index.
#[derive(Clone)]
pub struct PageCache {
    inner: Arc<Inner>,
}

struct Inner {
    fetcher: Arc<dyn RangeFetcher>,
    config: PageCacheConfig,
    state: Mutex<State>,
}

enum Lookup {
    Hit(Arc<CachePage>),
    Pending(Load<CachePage>),
}

struct State {
    pages: LruCache<PageKey, Cached<CachePage>>,
    loading: InFlight<PageKey, CachePage>,
}

impl PageCache {
    #[must_use]
    #[inline]
    pub fn new(fetcher: Arc<dyn RangeFetcher>, config: PageCacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                config,
                state: Mutex::new(State {
                    pages: LruCache::new(config.capacity),
                    loading: InFlight::new(),
                }),
            }),
        }
    }

    #[must_use]
    #[inline]
    pub fn page_size(&self) -> u64 {
        self.inner.config.page_size
    }

    #[must_use]
    #[inline]
    pub fn page_count(&self, plain_size: u64) -> u64 {
        plain_size.div_ceil(self.inner.config.page_size)
    }

    /// Returns page `index` of the file, fetching and decrypting it on a miss.
    ///
    /// Following pages are scheduled for background loading. Failed loads are
    /// not retried.
    #[inline]
    pub async fn get(
        &self,
        header: &Arc<CipherHeader>,
        index: u64,
    ) -> Result<Arc<CachePage>, TransferError> {
        let key = PageKey {
            file_id: header.file_id.clone(),
            index,
        };
        let lookup = {
            let mut state = self.inner.state.lock();
            let ttl = self.inner.config.ttl;
            match state
                .pages
                .get(&key)
                .map(|cached| (cached.is_fresh(ttl), Arc::clone(&cached.value)))
            {
                Some((true, page)) => {
                    trace!(file_id = %key.file_id, index, "page hit");
                    Lookup::Hit(page)
                }
                expired => {
                    if expired.is_some() {
                        state.pages.pop(&key);
                    }
                    Lookup::Pending(self.start_or_join(&mut state, header, key))
                }
            }
        };
        self.prefetch(header, index);
        match lookup {
            Lookup::Hit(page) => Ok(page),
            Lookup::Pending(load) => load.await,
        }
    }

    fn start_or_join(
        &self,
        state: &mut State,
        header: &Arc<CipherHeader>,
        key: PageKey,
    ) -> Load<CachePage> {
        if let Some(load) = state.loading.get(&key) {
            return load;
        }
        let inner = Arc::clone(&self.inner);
        let header = Arc::clone(header);
        let load_key = key.clone();
        state.loading.start(key, move |ticket| {
            async move {
                let result = inner.load(&header, load_key.index).await.map(Arc::new);
                let mut state = inner.state.lock();
                let current = state.loading.finish(&load_key, ticket);
                match &result {
                    Ok(page) if current => {
                        state.pages.put(load_key, Cached::new(Arc::clone(page)));
                    }
                    Ok(_) => debug!(
                        file_id = %load_key.file_id,
                        index = load_key.index,
                        "page invalidated while loading",
                    ),
                    Err(_) => {}
                }
                result
            }
            .boxed()
        })
    }

    fn prefetch(&self, header: &Arc<CipherHeader>, index: u64) {
        let count = self.page_count(header.plain_size);
        let last = index.saturating_add(self.inner.config.prefetch);
        let mut state = self.inner.state.lock();
        for next in index.saturating_add(1)..=last {
            if next >= count {
                break;
            }
            let key = PageKey {
                file_id: header.file_id.clone(),
                index: next,
            };
            let cached = state
                .pages
                .peek(&key)
                .is_some_and(|page| page.is_fresh(self.inner.config.ttl));
            if cached || state.loading.contains(&key) {
                continue;
            }
            trace!(file_id = %header.file_id, index = next, "prefetching page");
            drop(self.start_or_join(&mut state, header, key));
        }
    }

    /// Drops every cached page of the file. Loads in progress are not
    /// published.
    #[inline]
    pub fn invalidate_file(&self, file_id: &FileId) {
        let mut state = self.inner.state.lock();
        let keys: Vec<PageKey> = state
            .pages
            .iter()
            .filter(|(key, _)| &key.file_id == file_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            state.pages.pop(key);
        }
        let cancelled = state.loading.cancel(|key| &key.file_id == file_id);
        debug!(%file_id, pages = keys.len(), cancelled, "pages invalidated");
    }

    #[must_use]
    #[inline]
    pub fn is_cached(&self, file_id: &FileId, index: u64) -> bool {
        let key = PageKey {
            file_id: file_id.clone(),
            index,
        };
        self.inner.state.lock().pages.contains(&key)
    }

    #[must_use]
    #[inline]
    pub fn cached_pages(&self) -> usize {
        self.inner.state.lock().pages.len()
    }
}

impl Inner {
    async fn load(&self, header: &CipherHeader, index: u64) -> Result<CachePage, TransferError> {
        let page_error = |reason: String| TransferError::Page {
            file_id: header.file_id.clone(),
            page: index,
            reason,
        };
        let start = index.saturating_mul(self.config.page_size);
        if start >= header.plain_size {
            return Err(page_error("page is beyond the end of the file".into()));
        }
        let end = start
            .saturating_add(self.config.page_size)
            .min(header.plain_size)
            .saturating_sub(1);
        let stored = ByteRange::new(
            header.data_offset.saturating_add(start),
            header.data_offset.saturating_add(end),
        );

        let mut plaintext = fetch_all(&*self.fetcher, &header.location, stored)
            .await
            .map_err(|err| page_error(err.to_string()))?;
        CounterCipher::at_offset(&header.key, &header.iv, start).apply(&mut plaintext);
        debug!(file_id = %header.file_id, index, len = plaintext.len(), "page loaded");
        Ok(CachePage {
            key: PageKey {
                file_id: header.file_id.clone(),
                index,
            },
            plaintext: plaintext.into(),
        })
    }
}
