//! Bounded entry store: the index of per-key metadata, the read-side
//! validation pipeline, and the capacity/time policies.
//!
//! The index is the authority on which keys exist; value bytes live in the
//! storage backend. A read validates the entry's tag witnesses against the
//! trie, fetches the value, and applies the time policies (TTL expiry,
//! TTI extension, coalesced recency stamps). Entries found dead are
//! removed from the index immediately, but their backend deletes are
//! queued and drained by the next write or housekeeping pass, so readers
//! never block on backend I/O.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, trace};

use crate::clock::now_ms;
use crate::config::CacheConfig;
use crate::entry::{EntryMeta, StoredRecord, TagSnapshot};
use crate::error::{CacheError, Result};
use crate::metrics::{tick, CacheMetrics};
use crate::storage::Storage;
use crate::trie::{TagStamp, TagTrie, TagValidity};

/// How many candidates an eviction inspects. The victim is the least
/// recently used of the sample, not of the whole index.
const EVICTION_SAMPLE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MissReason {
    Cold,
    Expired,
    Stale,
    ValueMissing,
}

pub(crate) enum Lookup {
    Hit(Vec<u8>),
    Miss(MissReason),
}

pub(crate) struct BoundedStore {
    storage: Arc<dyn Storage>,
    trie: Arc<TagTrie>,
    index: DashMap<String, Arc<EntryMeta>>,
    pending_deletes: Mutex<Vec<String>>,
    metrics: Arc<CacheMetrics>,
    max_entries: Option<usize>,
    max_value_bytes: Option<usize>,
    read_extend_ttl: bool,
    tti_flush_ms: u64,
    lru_update_ms: u64,
}

impl BoundedStore {
    pub(crate) fn new(
        storage: Arc<dyn Storage>,
        trie: Arc<TagTrie>,
        metrics: Arc<CacheMetrics>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            storage,
            trie,
            index: DashMap::new(),
            pending_deletes: Mutex::new(Vec::new()),
            metrics,
            max_entries: config.max_entries,
            max_value_bytes: config.max_value_bytes,
            read_extend_ttl: config.read_extend_ttl,
            tti_flush_ms: config.tti_flush_secs.saturating_mul(1000),
            lru_update_ms: config.lru_update_interval.saturating_mul(1000),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    /// The read path: index lookup, expiry check, witness validation with
    /// in-place repair, value fetch, TTI extension, recency stamp.
    pub(crate) fn lookup(&self, key: &str) -> Result<Lookup> {
        let now = now_ms();
        let meta = match self.index.get(key) {
            Some(entry) => entry.value().clone(),
            None => match self.rehydrate(key)? {
                Some(meta) => meta,
                None => return Ok(Lookup::Miss(MissReason::Cold)),
            },
        };

        if meta.is_expired(now) {
            self.discard(key);
            return Ok(Lookup::Miss(MissReason::Expired));
        }

        for snapshot in meta.tags.iter() {
            match self.trie.check(&snapshot.tag, &snapshot.stamp()) {
                TagValidity::Stale => {
                    trace!(key, tag = %snapshot.tag, "entry invalidated by tag");
                    self.discard(key);
                    return Ok(Lookup::Miss(MissReason::Stale));
                }
                TagValidity::Valid { observed_now } => {
                    // Repair a witness left behind by sibling invalidations
                    // so the next read takes the single-comparison path.
                    if observed_now != snapshot.observed.load(Ordering::Relaxed) {
                        snapshot.observed.store(observed_now, Ordering::Relaxed);
                    }
                }
            }
        }

        let Some(bytes) = self.storage.get(key)? else {
            // Storage lost the value underneath the index (an eviction or
            // delete raced); drop the metadata and miss.
            self.index.remove(key);
            return Ok(Lookup::Miss(MissReason::ValueMissing));
        };
        let record = StoredRecord::decode(&bytes)?;

        if meta.tti_enabled {
            self.extend_idle_window(key, &meta, now);
        }

        let last_used = meta.last_used_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last_used) >= self.lru_update_ms {
            meta.last_used_ms.store(now, Ordering::Relaxed);
        }

        Ok(Lookup::Hit(record.value))
    }

    /// Write an entry: capture witnesses, enforce capacity, store the
    /// record, and only then expose it through the index. A storage
    /// failure leaves the index untouched.
    pub(crate) fn set(
        &self,
        key: &str,
        value: &[u8],
        tags: &[&str],
        ttl: Option<Duration>,
    ) -> Result<()> {
        if let Some(cap) = self.max_value_bytes {
            if value.len() > cap {
                return Err(CacheError::StorageIsFull);
            }
        }

        let now = now_ms();
        let snapshots: Vec<TagSnapshot> = tags
            .iter()
            .map(|tag| TagSnapshot::new((*tag).to_string(), self.trie.snapshot(tag)))
            .collect();
        let ttl_ms = ttl.map(|d| d.as_millis() as u64);
        let meta = Arc::new(EntryMeta::new(
            snapshots,
            ttl_ms,
            self.read_extend_ttl && ttl_ms.is_some(),
            now,
        ));

        if !self.index.contains_key(key) {
            self.ensure_capacity();
        }

        let record = StoredRecord::from_meta(key, value, &meta);
        self.storage.put(key, &record.encode()?)?;
        self.index.insert(key.to_string(), meta);
        self.drain_deletes();
        Ok(())
    }

    /// Remove the entry from the index now; queue the backend delete.
    pub(crate) fn discard(&self, key: &str) {
        if self.index.remove(key).is_some() {
            self.pending_deletes.lock().push(key.to_string());
        }
    }

    pub(crate) fn drain_deletes(&self) {
        let keys = std::mem::take(&mut *self.pending_deletes.lock());
        for key in keys {
            // A re-set may have raced the queued delete; the index decides.
            if self.index.contains_key(&key) {
                continue;
            }
            if let Err(e) = self.storage.delete(&key) {
                tick(&self.metrics.errors);
                debug!(key = %key, error = %e, "deferred delete failed");
            }
        }
    }

    pub(crate) fn clear(&self) -> Result<()> {
        self.index.clear();
        self.pending_deletes.lock().clear();
        self.storage.clear()
    }

    /// Re-admit an entry that survived in a persistent backend but is not
    /// in the index, e.g. after a restart.
    ///
    /// The index only loses state relative to storage when the trie's
    /// clocks restarted with it, so the stored witness values belong to
    /// another clock epoch and cannot be compared against this trie.
    /// Zeroed witnesses give the entry the "never invalidated since this
    /// clock started" reading: history from before the restart is
    /// forgiven, anything invalidated on this instance stales it.
    fn rehydrate(&self, key: &str) -> Result<Option<Arc<EntryMeta>>> {
        let Some(bytes) = self.storage.get(key)? else {
            return Ok(None);
        };
        let record = StoredRecord::decode(&bytes)?;
        let (mut meta, _value) = record.into_meta();
        meta.tags = meta
            .tags
            .iter()
            .map(|t| TagSnapshot::new(t.tag.clone(), TagStamp::EPOCH_START))
            .collect();
        let meta = self
            .index
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(meta))
            .value()
            .clone();
        debug!(key, "rehydrated entry from storage");
        Ok(Some(meta))
    }

    /// Push the expiry out to `now + ttl`. The in-memory expiry moves on
    /// every read; the rewrite of the stored record is coalesced to one
    /// per flush window, so a crash can cost at most the last window.
    fn extend_idle_window(&self, key: &str, meta: &EntryMeta, now: u64) {
        let Some(ttl_ms) = meta.ttl_ms else { return };
        let current = meta.expires_at_ms.load(Ordering::Relaxed);
        if current == 0 {
            return;
        }
        let target = now.saturating_add(ttl_ms);
        if target <= current {
            return;
        }
        meta.expires_at_ms.store(target, Ordering::Relaxed);

        let last_flush = meta.last_tti_flush_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last_flush) < self.tti_flush_ms {
            return;
        }
        meta.last_tti_flush_ms.store(now, Ordering::Relaxed);

        let flushed = self
            .storage
            .get(key)
            .and_then(|bytes| match bytes {
                Some(bytes) => {
                    let mut record = StoredRecord::decode(&bytes)?;
                    record.expires_at_ms = target;
                    self.storage.put(key, &record.encode()?)
                }
                None => Ok(()),
            });
        if let Err(e) = flushed {
            tick(&self.metrics.tti_overflows);
            debug!(key, error = %e, "failed to persist idle-time extension");
        }
    }

    fn ensure_capacity(&self) {
        let Some(max) = self.max_entries else { return };
        while self.index.len() >= max {
            let Some(victim) = self.pick_victim() else { break };
            debug!(key = %victim, "evicting least recently used entry");
            self.discard(&victim);
        }
    }

    /// Approximate LRU: sample a window of the index and take the oldest
    /// recency stamp in it.
    fn pick_victim(&self) -> Option<String> {
        let len = self.index.len();
        if len == 0 {
            return None;
        }
        let skip = if len > EVICTION_SAMPLE {
            rand::thread_rng().gen_range(0..=(len - EVICTION_SAMPLE))
        } else {
            0
        };
        let mut victim: Option<(String, u64)> = None;
        for entry in self.index.iter().skip(skip).take(EVICTION_SAMPLE) {
            let used = entry.value().last_used_ms.load(Ordering::Relaxed);
            if victim.as_ref().map_or(true, |(_, best)| used < *best) {
                victim = Some((entry.key().clone(), used));
            }
        }
        victim.map(|(key, _)| key)
    }
}
