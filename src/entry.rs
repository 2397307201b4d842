//! Per-key metadata and the record format entries take through storage.
//!
//! The index keeps an `EntryMeta` per key; the value bytes themselves live
//! in the storage backend. Everything needed to revalidate an entry (tag
//! witnesses, expiry window) rides along in the stored record, so a
//! persistent backend can be reopened against a fresh trie and its entries
//! still validate.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::trie::TagStamp;

/// One tag witness held by an entry. `counter` and `clock` are fixed at
/// write time; `observed` is refreshed in place on valid reads.
pub(crate) struct TagSnapshot {
    pub tag: String,
    pub counter: u64,
    pub clock: u64,
    pub observed: AtomicU64,
}

impl TagSnapshot {
    pub(crate) fn new(tag: String, stamp: TagStamp) -> Self {
        Self {
            tag,
            counter: stamp.counter,
            clock: stamp.clock,
            observed: AtomicU64::new(stamp.observed),
        }
    }

    pub(crate) fn stamp(&self) -> TagStamp {
        TagStamp {
            counter: self.counter,
            clock: self.clock,
            observed: self.observed.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct EntryMeta {
    pub created_at_ms: u64,
    pub ttl_ms: Option<u64>,
    /// 0 means no expiry.
    pub expires_at_ms: AtomicU64,
    pub tti_enabled: bool,
    pub last_used_ms: AtomicU64,
    /// When the expiry was last persisted, for TTI write coalescing.
    pub last_tti_flush_ms: AtomicU64,
    pub tags: Box<[TagSnapshot]>,
}

impl EntryMeta {
    pub(crate) fn new(
        tags: Vec<TagSnapshot>,
        ttl_ms: Option<u64>,
        tti_enabled: bool,
        now_ms: u64,
    ) -> Self {
        let expires = ttl_ms.map(|ttl| now_ms.saturating_add(ttl)).unwrap_or(0);
        Self {
            created_at_ms: now_ms,
            ttl_ms,
            expires_at_ms: AtomicU64::new(expires),
            tti_enabled,
            last_used_ms: AtomicU64::new(now_ms),
            last_tti_flush_ms: AtomicU64::new(now_ms),
            tags: tags.into_boxed_slice(),
        }
    }

    pub(crate) fn is_expired(&self, now_ms: u64) -> bool {
        let expires = self.expires_at_ms.load(Ordering::Relaxed);
        expires != 0 && now_ms > expires
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredTag {
    pub tag: String,
    pub counter: u64,
    pub clock: u64,
    pub observed: u64,
}

/// The serialized form an entry takes through the storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub key: String,
    pub value: Vec<u8>,
    pub tags: Vec<StoredTag>,
    pub created_at_ms: u64,
    pub ttl_ms: Option<u64>,
    /// 0 means no expiry.
    pub expires_at_ms: u64,
    pub tti: bool,
}

impl StoredRecord {
    pub(crate) fn from_meta(key: &str, value: &[u8], meta: &EntryMeta) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_vec(),
            tags: meta
                .tags
                .iter()
                .map(|t| StoredTag {
                    tag: t.tag.clone(),
                    counter: t.counter,
                    clock: t.clock,
                    observed: t.observed.load(Ordering::Relaxed),
                })
                .collect(),
            created_at_ms: meta.created_at_ms,
            ttl_ms: meta.ttl_ms,
            expires_at_ms: meta.expires_at_ms.load(Ordering::Relaxed),
            tti: meta.tti_enabled,
        }
    }

    /// Rebuild index metadata from a record read back out of storage, e.g.
    /// after a restart with a persistent backend.
    pub(crate) fn into_meta(self) -> (EntryMeta, Vec<u8>) {
        let tags = self
            .tags
            .into_iter()
            .map(|t| TagSnapshot {
                tag: t.tag,
                counter: t.counter,
                clock: t.clock,
                observed: AtomicU64::new(t.observed),
            })
            .collect();
        let meta = EntryMeta {
            created_at_ms: self.created_at_ms,
            ttl_ms: self.ttl_ms,
            expires_at_ms: AtomicU64::new(self.expires_at_ms),
            tti_enabled: self.tti,
            last_used_ms: AtomicU64::new(self.created_at_ms),
            last_tti_flush_ms: AtomicU64::new(self.created_at_ms),
            tags,
        };
        (meta, self.value)
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CacheError::Storage(e.into()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Storage(e.into()))
    }
}
