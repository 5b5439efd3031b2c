//! Single-flight TTL cache for remote check state.
//!
//! Each key has at most one fetch in flight. The first caller for a key
//! inserts a pending entry, releases the lock and runs the fetch; every
//! other caller for that key waits on the entry's readiness channel and
//! receives the same outcome. Fetches for different keys never block each
//! other.
//!
//! - A failed fetch is not cached: the entry is removed before waiters wake.
//! - An entry found past its expiry is returned once more, then evicted.
//! - A fetching caller dropped mid-flight abandons the entry; waiters retry.
//! - A background sweep removes expired entries nobody reads any more.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError, Weak};
use std::time::Duration;

use common::{CallContext, ContextError, HttpError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Cache of raw check responses keyed by target host.
pub type CheckCache = TtlCache<Arc<[u8]>, HttpError>;

/// Entry lifetime and sweep period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            interval: Duration::from_secs(300),
        }
    }
}

enum Slot<V, E> {
    Pending,
    Ready(Result<V, E>),
}

struct Entry<V, E> {
    expires: Instant,
    ready: watch::Receiver<Slot<V, E>>,
}

struct State<V, E> {
    settings: CacheSettings,
    store: HashMap<String, Arc<Entry<V, E>>>,
}

struct Inner<V, E> {
    state: Mutex<State<V, E>>,
    sweeper: Once,
}

impl<V, E> Inner<V, E> {
    fn lock(&self) -> MutexGuard<'_, State<V, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove `key` only while it still maps to `entry`.
    fn evict(&self, key: &str, entry: &Arc<Entry<V, E>>) {
        let mut state = self.lock();
        if state
            .store
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            state.store.remove(key);
        }
    }
}

/// Deduplicating TTL cache. Cloning shares the underlying store.
pub struct TtlCache<V, E> {
    inner: Arc<Inner<V, E>>,
}

impl<V, E> Clone for TtlCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, E> Default for TtlCache<V, E> {
    fn default() -> Self {
        Self::new(CacheSettings::default())
    }
}

impl<V, E> TtlCache<V, E> {
    #[must_use]
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    settings,
                    store: HashMap::new(),
                }),
                sweeper: Once::new(),
            }),
        }
    }

    /// Change the ttl of new entries and the period of later sweeps.
    pub fn tune(&self, ttl: Duration, interval: Duration) {
        let mut state = self.inner.lock();
        state.settings = CacheSettings { ttl, interval };
        debug!(ttl = ?ttl, interval = ?interval, "Cache tuned");
    }

    #[must_use]
    pub fn settings(&self) -> CacheSettings {
        self.inner.lock().settings
    }

    /// Drop `key` unconditionally.
    pub fn delete(&self, key: &str) {
        self.inner.lock().store.remove(key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V, E> TtlCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<ContextError> + 'static,
{
    /// Value for `key`, running `fetch` only if no entry exists.
    ///
    /// Waiting on another caller's fetch is bounded by `ctx`.
    pub async fn get<F, Fut>(&self, ctx: &CallContext, key: &str, mut fetch: F) -> Result<V, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.start_sweeper();

        loop {
            let (entry, filler) = self.lookup_or_insert(key);

            let result = if let Some(tx) = filler {
                let mut fill = Fill {
                    inner: &self.inner,
                    key,
                    entry: &entry,
                    tx: Some(tx),
                };
                let result = fetch().await;
                fill.complete(result.clone());
                result
            } else {
                let mut ready = entry.ready.clone();
                let outcome = ctx
                    .run(async {
                        ready
                            .wait_for(|slot| matches!(slot, Slot::Ready(_)))
                            .await
                            .ok()
                            .and_then(|slot| match &*slot {
                                Slot::Ready(result) => Some(result.clone()),
                                Slot::Pending => None,
                            })
                    })
                    .await?;
                let Some(result) = outcome else {
                    debug!(key = %key, "Cache fill abandoned, retrying");
                    continue;
                };
                debug!(key = %key, "Using cached value");
                result
            };

            if Instant::now() >= entry.expires {
                debug!(key = %key, "Evicting stale cache entry");
                self.inner.evict(key, &entry);
            }
            return result;
        }
    }

    fn lookup_or_insert(
        &self,
        key: &str,
    ) -> (Arc<Entry<V, E>>, Option<watch::Sender<Slot<V, E>>>) {
        let mut state = self.inner.lock();
        if let Some(entry) = state.store.get(key) {
            return (Arc::clone(entry), None);
        }
        let (tx, rx) = watch::channel(Slot::Pending);
        let entry = Arc::new(Entry {
            expires: Instant::now() + state.settings.ttl,
            ready: rx,
        });
        state.store.insert(key.to_string(), Arc::clone(&entry));
        (entry, Some(tx))
    }

    fn start_sweeper(&self) {
        self.inner.sweeper.call_once(|| {
            debug!("Starting cache sweeper");
            tokio::spawn(sweep(Arc::downgrade(&self.inner)));
        });
    }
}

/// In-flight fill owned by the fetching caller.
struct Fill<'a, V, E> {
    inner: &'a Inner<V, E>,
    key: &'a str,
    entry: &'a Arc<Entry<V, E>>,
    tx: Option<watch::Sender<Slot<V, E>>>,
}

impl<V, E> Fill<'_, V, E> {
    fn complete(&mut self, result: Result<V, E>) {
        if result.is_err() {
            self.inner.evict(self.key, self.entry);
        }
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Slot::Ready(result));
        }
    }
}

impl<V, E> Drop for Fill<'_, V, E> {
    fn drop(&mut self) {
        // tx is still held only when the fetch never completed
        if self.tx.is_some() {
            self.inner.evict(self.key, self.entry);
        }
    }
}

async fn sweep<V, E>(inner: Weak<Inner<V, E>>) {
    loop {
        let Some(interval) = inner.upgrade().map(|inner| inner.lock().settings.interval) else {
            return;
        };
        tokio::time::sleep(interval).await;

        let Some(inner) = inner.upgrade() else {
            return;
        };
        let evicted = {
            let now = Instant::now();
            let mut state = inner.lock();
            let before = state.store.len();
            state.store.retain(|_, entry| entry.expires > now);
            before - state.store.len()
        };
        if evicted > 0 {
            debug!(evicted, "Swept stale cache entries");
        }
    }
}
