use {
    crate::error::TransferError,
    futures::{
        FutureExt,
        future::{BoxFuture, Shared},
    },
    std::{collections::HashMap, hash::Hash, sync::Arc},
};

pub type Load<V> = Shared<BoxFuture<'static, Result<Arc<V>, TransferError>>>;

/// Identifies one started load. A load whose ticket is no longer registered
/// was cancelled by an invalidation and must not publish its result.
pub type Ticket = u64;

/// Loads in progress, at most one per key.
pub struct InFlight<K, V> {
    loads: HashMap<K, (Ticket, Load<V>)>,
    next_ticket: Ticket,
}

impl<K, V> InFlight<K, V>
where
    K: Hash + Eq,
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            loads: HashMap::new(),
            next_ticket: 0,
        }
    }

    pub fn get(&self, key: &K) -> Option<Load<V>> {
        self.loads.get(key).map(|(_, load)| load.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.loads.contains_key(key)
    }

    /// Registers the load built by `make` and spawns a task that drives it to
    /// completion.
    ///
    /// The load itself must call [`InFlight::finish`] with its ticket when done.
    pub fn start(
        &mut self,
        key: K,
        make: impl FnOnce(Ticket) -> BoxFuture<'static, Result<Arc<V>, TransferError>>,
    ) -> Load<V> {
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        let shared = make(ticket).shared();
        self.loads.insert(key, (ticket, shared.clone()));
        tokio::spawn(shared.clone());
        shared
    }

    /// Unregisters the load. Returns `false` if it was cancelled meanwhile.
    pub fn finish(&mut self, key: &K, ticket: Ticket) -> bool {
        match self.loads.get(key) {
            Some((current, _)) if *current == ticket => {
                self.loads.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Cancels matching loads. Callers already waiting still get the result,
    /// but it is not published to the cache.
    pub fn cancel(&mut self, mut matches: impl FnMut(&K) -> bool) -> usize {
        let before = self.loads.len();
        self.loads.retain(|key, _| !matches(key));
        before.saturating_sub(self.loads.len())
    }
}
