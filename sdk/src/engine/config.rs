use {
    crate::{
        cache::{HeaderStoreConfig, PageCacheConfig},
        crypto::BLOCK_SIZE,
        fetch::RetryPolicy,
    },
    anyhow::{Result, ensure, format_err},
    byte_unit::Byte,
    serde::Deserialize,
    std::{num::NonZeroUsize, time::Duration},
};

/// How plaintext is read from AES-encrypted files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadStrategy {
    /// Through the shared page cache, with prefetch.
    #[default]
    Paged,
    /// One block-aligned fetch per request, decrypted while streaming.
    Direct,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_page_size")]
    pub page_size: Byte,
    /// Maximum number of pages kept in memory.
    #[serde(default = "default_page_count")]
    pub page_count: usize,
    #[serde(default = "default_prefetch_pages")]
    pub prefetch_pages: u64,
    #[serde(with = "humantime_serde", default = "default_page_ttl")]
    pub page_ttl: Duration,
    #[serde(with = "humantime_serde", default = "default_header_ttl")]
    pub header_ttl: Duration,
    /// Attempts at loading a header before the transfer fails.
    #[serde(default = "default_header_retries")]
    pub header_retries: usize,
    #[serde(with = "humantime_serde", default = "default_header_retry_period")]
    pub header_retry_period: Duration,
    #[serde(default)]
    pub read_strategy: ReadStrategy,
    /// Bytes stored before the IV of encrypted objects.
    #[serde(default)]
    pub integrity_prefix: u64,
}

fn default_page_size() -> Byte {
    Byte::from_u64(1024 * 1024)
}

fn default_page_count() -> usize {
    15
}

fn default_prefetch_pages() -> u64 {
    3
}

fn default_page_ttl() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_header_ttl() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_header_retries() -> usize {
    3
}

fn default_header_retry_period() -> Duration {
    Duration::from_millis(500)
}

impl Default for EngineConfig {
    #[inline]
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            page_count: default_page_count(),
            prefetch_pages: default_prefetch_pages(),
            page_ttl: default_page_ttl(),
            header_ttl: default_header_ttl(),
            header_retries: default_header_retries(),
            header_retry_period: default_header_retry_period(),
            read_strategy: ReadStrategy::default(),
            integrity_prefix: 0,
        }
    }
}

impl EngineConfig {
    #[inline]
    pub fn validate(&self) -> Result<()> {
        let page_size = self.page_size.as_u64();
        ensure!(page_size > 0, "page_size must be positive");
        ensure!(
            page_size % BLOCK_SIZE == 0,
            "page_size must be a multiple of {BLOCK_SIZE}, got {page_size}"
        );
        ensure!(self.page_count > 0, "page_count must be positive");
        ensure!(
            u64::try_from(self.page_count).unwrap_or(u64::MAX) > self.prefetch_pages,
            "page_count ({}) must exceed prefetch_pages ({}), or prefetched pages evict \
             the page being read",
            self.page_count,
            self.prefetch_pages,
        );
        ensure!(self.header_retries > 0, "header_retries must be positive");
        Ok(())
    }

    pub(crate) fn page_cache(&self) -> Result<PageCacheConfig> {
        Ok(PageCacheConfig {
            page_size: self.page_size.as_u64(),
            capacity: NonZeroUsize::new(self.page_count)
                .ok_or_else(|| format_err!("page_count must be positive"))?,
            ttl: self.page_ttl,
            prefetch: self.prefetch_pages,
        })
    }

    pub(crate) fn header_store(&self) -> HeaderStoreConfig {
        HeaderStoreConfig {
            ttl: self.header_ttl,
            retry: RetryPolicy {
                attempts: self.header_retries,
                period: self.header_retry_period,
            },
            integrity_prefix: self.integrity_prefix,
        }
    }
}
