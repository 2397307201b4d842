//! The cache itself: reads, writes, invalidation, singleflight entry
//! points, and the bus hookup.
//!
//! A `Cache` is an explicit owned value built from a [`CacheConfig`];
//! nothing here is process-global (see [`crate::global`] for the
//! convenience wrapper). All methods take `&self` and are safe to share
//! across threads behind an `Arc`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::bus::{self, Bus};
use crate::clock::now_secs;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::flight::{FlightPermit, FlightRole, FlightTable, FlightWaiter};
use crate::metrics::{tick, CacheMetrics, CacheStats};
use crate::storage::{self, Storage};
use crate::store::{BoundedStore, Lookup};
use crate::tag::validate_tag;
use crate::trie::TagTrie;

/// Result of the atomic hit-or-lead-or-join decision on a key.
pub enum GetOrEnter {
    /// The key is cached and valid.
    Hit(Vec<u8>),
    /// The key is missing and this caller was elected to produce it. The
    /// permit must be completed after storing (or failed) to release any
    /// waiters; dropping it counts as failure.
    Leader(FlightPermit),
    /// Another caller is already producing; wait on the handle.
    Waiter(FlightWaiter),
}

pub struct Cache {
    config: CacheConfig,
    trie: Arc<TagTrie>,
    store: BoundedStore,
    flights: FlightTable,
    bus: Option<Arc<dyn Bus>>,
    metrics: Arc<CacheMetrics>,
    op_count: AtomicU64,
    started: OnceCell<()>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Cache {
    /// Build a cache, resolving the storage and bus backends from the
    /// config URLs.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let storage = storage::open(config.storage_url.as_deref(), config.storage_max_bytes)?;
        let bus = bus::open(config.bus_url.as_deref())?;
        Ok(Self::with_parts(config, storage, bus))
    }

    /// Build a cache over explicit backend instances. Useful for sharing
    /// a backend between caches and for tests.
    pub fn with_parts(
        config: CacheConfig,
        storage: Arc<dyn Storage>,
        bus: Option<Arc<dyn Bus>>,
    ) -> Self {
        let trie = Arc::new(TagTrie::new());
        let metrics = Arc::new(CacheMetrics::default());
        let store = BoundedStore::new(storage, trie.clone(), metrics.clone(), &config);
        Self {
            config,
            trie,
            store,
            flights: FlightTable::new(),
            bus,
            metrics,
            op_count: AtomicU64::new(0),
            started: OnceCell::new(),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Start the background side: subscribe to the invalidation bus (when
    /// one is configured) and run wall-clock trie pruning (when
    /// `auto_prune_secs` is set). Idempotent; requires a tokio runtime.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.set(()).is_err() {
            return Ok(());
        }
        let mut handles = Vec::new();

        if let Some(bus) = &self.bus {
            let channel = format!("{}:invalidate", self.config.channel_prefix());
            let mut rx = bus.subscribe(&channel)?;
            debug!(channel = %channel, "subscribed to invalidation bus");
            let weak = Arc::downgrade(self);
            handles.push(tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    let Some(cache) = weak.upgrade() else { break };
                    cache.apply_bus_message(&message);
                }
            }));
        }

        if let Some(secs) = self.config.auto_prune_secs {
            let period = Duration::from_secs(secs.max(1));
            let weak = Arc::downgrade(self);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let Some(cache) = weak.upgrade() else { break };
                    cache.trie.prune(cache.config.prune_age());
                    cache.store.drain_deletes();
                }
            }));
        }

        self.background.lock().extend(handles);
        Ok(())
    }

    /// Read a key. Never blocks on in-flight producers: a missing,
    /// expired or invalidated entry is simply `None`.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.tick_op();
        match self.store.lookup(key) {
            Ok(Lookup::Hit(value)) => {
                tick(&self.metrics.hits);
                trace!(key, "cache hit");
                Ok(Some(value))
            }
            Ok(Lookup::Miss(reason)) => {
                tick(&self.metrics.misses);
                trace!(key, ?reason, "cache miss");
                Ok(None)
            }
            Err(e) => {
                tick(&self.metrics.errors);
                Err(e)
            }
        }
    }

    /// Store a value under `key`, witnessing `tags` at this instant. The
    /// TTL falls back to the configured default; tags are validated
    /// before anything is mutated.
    pub fn set(&self, key: &str, value: &[u8], tags: &[&str], ttl: Option<Duration>) -> Result<()> {
        for tag in tags {
            validate_tag(tag)?;
        }
        self.tick_op();
        let ttl = ttl.or_else(|| self.config.default_ttl());
        match self.store.set(key, value, tags, ttl) {
            Ok(()) => {
                trace!(key, tags = tags.len(), "entry stored");
                Ok(())
            }
            Err(e) => {
                tick(&self.metrics.errors);
                Err(e)
            }
        }
    }

    /// The atomic decision a miss-path caller needs: a hit, leadership of
    /// a new flight, or a waiter handle on the existing one.
    pub fn get_or_enter(&self, key: &str) -> Result<GetOrEnter> {
        if let Some(value) = self.get(key)? {
            return Ok(GetOrEnter::Hit(value));
        }
        match self.flights.begin(key) {
            FlightRole::Leader(permit) => {
                // A completion may have landed between our miss and the
                // election; serve it and release anyone queued behind us.
                if let Some(value) = self.get(key)? {
                    permit.complete();
                    return Ok(GetOrEnter::Hit(value));
                }
                Ok(GetOrEnter::Leader(permit))
            }
            FlightRole::Waiter(waiter) => Ok(GetOrEnter::Waiter(waiter)),
        }
    }

    /// Read `key`, producing and storing it on a miss with at most one
    /// producer running across all concurrent callers.
    ///
    /// Waiters whose leader fails retry from the top (the first one back
    /// is elected); waiters whose leader outlives `flight_timeout` get a
    /// [`CacheError::LeaderTimeout`]. A producer error is returned to the
    /// producing caller only.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        tags: &[&str],
        ttl: Option<Duration>,
        produce: F,
    ) -> anyhow::Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<u8>>>,
    {
        let mut produce = Some(produce);
        loop {
            match self.get_or_enter(key)? {
                GetOrEnter::Hit(value) => return Ok(value),
                GetOrEnter::Leader(permit) => {
                    let produce = produce.take().expect("leader runs at most once");
                    match produce().await {
                        Ok(value) => {
                            self.set(key, &value, tags, ttl)?;
                            permit.complete();
                            return Ok(value);
                        }
                        Err(e) => {
                            permit.fail();
                            return Err(e);
                        }
                    }
                }
                GetOrEnter::Waiter(waiter) => {
                    if let Err(e) = waiter.wait(self.config.flight_timeout()).await {
                        if matches!(e, CacheError::LeaderTimeout(_)) {
                            tick(&self.metrics.singleflight_timeouts);
                        }
                        return Err(e.into());
                    }
                    // Stored: the next read hits. Failed: the loop lets us
                    // stand for election ourselves.
                }
            }
        }
    }

    /// Blocking twin of [`Cache::get_or_compute`], for synchronous
    /// callers. Waiters park on a condvar instead of a future; do not
    /// call this from an async context.
    pub fn get_or_compute_sync<F>(
        &self,
        key: &str,
        tags: &[&str],
        ttl: Option<Duration>,
        produce: F,
    ) -> anyhow::Result<Vec<u8>>
    where
        F: FnOnce() -> anyhow::Result<Vec<u8>>,
    {
        let mut produce = Some(produce);
        loop {
            match self.get_or_enter(key)? {
                GetOrEnter::Hit(value) => return Ok(value),
                GetOrEnter::Leader(permit) => {
                    let produce = produce.take().expect("leader runs at most once");
                    match produce() {
                        Ok(value) => {
                            self.set(key, &value, tags, ttl)?;
                            permit.complete();
                            return Ok(value);
                        }
                        Err(e) => {
                            permit.fail();
                            return Err(e);
                        }
                    }
                }
                GetOrEnter::Waiter(waiter) => {
                    if let Err(e) = waiter.wait_sync(self.config.flight_timeout()) {
                        if matches!(e, CacheError::LeaderTimeout(_)) {
                            tick(&self.metrics.singleflight_timeouts);
                        }
                        return Err(e.into());
                    }
                }
            }
        }
    }

    /// Invalidate a tag: entries depending on it, on any prefix of it, or
    /// on any extension of it go stale on their next read. Published to
    /// the bus when one is configured, after the local clocks have moved.
    pub fn invalidate(&self, tag: &str) -> Result<()> {
        validate_tag(tag)?;
        self.tick_op();
        self.trie.invalidate(tag);
        tick(&self.metrics.invalidations);
        debug!(tag, "tag invalidated");

        if let Some(bus) = &self.bus {
            let channel = format!("{}:invalidate", self.config.channel_prefix());
            let payload = format!("{tag}|{}", now_secs());
            if let Err(e) = bus.publish(&channel, payload.as_bytes()) {
                tick(&self.metrics.errors);
                warn!(tag, error = %e, "failed to publish invalidation");
            }
        }
        Ok(())
    }

    /// Drop every entry and forget all invalidation history.
    pub fn clear(&self) -> Result<()> {
        self.store.clear()?;
        self.trie.reset();
        debug!("cache cleared");
        Ok(())
    }

    /// Drop trie nodes idle for longer than `max_age` and run any queued
    /// backend deletes.
    pub fn prune(&self, max_age: Duration) {
        self.trie.prune(max_age);
        self.store.drain_deletes();
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counter values plus the entry count.
    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot(self.store.len())
    }

    // A tag arriving from the bus is applied locally and never
    // re-published; our own messages echo back through the subscription.
    fn apply_bus_message(&self, payload: &[u8]) {
        let Ok(text) = std::str::from_utf8(payload) else {
            tick(&self.metrics.errors);
            warn!("discarding non-utf8 bus payload");
            return;
        };
        let Some((tag, _timestamp)) = text.rsplit_once('|') else {
            tick(&self.metrics.errors);
            warn!(payload = text, "discarding malformed bus payload");
            return;
        };
        if let Err(e) = validate_tag(tag) {
            tick(&self.metrics.errors);
            warn!(error = %e, "discarding bus payload with invalid tag");
            return;
        }
        self.trie.invalidate(tag);
        tick(&self.metrics.invalidations);
        trace!(tag, "applied invalidation from bus");
    }

    // Opportunistic housekeeping, paced by operation count.
    fn tick_op(&self) {
        let count = self.op_count.fetch_add(1, Ordering::Relaxed) + 1;
        let interval = self.config.auto_prune_interval.max(1);
        if count % interval == 0 {
            self.store.drain_deletes();
            if self.config.prune_after.is_some() {
                self.trie.prune(self.config.prune_age());
            }
        }
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }
    }
}
