//! In-memory caches in front of the object store.
//!
//! Both caches deduplicate concurrent loads of the same key: the first caller
//! starts the load and every later caller awaits the same shared future. Loads
//! are driven by a spawned task, so a load finishes and populates the cache
//! even if every caller has gone away.

mod flight;
mod header;
mod page;

pub use {
    header::{HeaderStore, HeaderStoreConfig},
    page::{PageCache, PageCacheConfig},
};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

struct Cached<V> {
    value: Arc<V>,
    loaded_at: Instant,
}

impl<V> Cached<V> {
    fn new(value: Arc<V>) -> Self {
        Self {
            value,
            loaded_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() < ttl
    }
}
