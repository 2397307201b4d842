//! Cache construction options.
//!
//! Every field has a default, so partial configurations deserialize cleanly
//! and tests can use struct-update syntax from `CacheConfig::default()`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub(crate) const DEFAULT_FLIGHT_TIMEOUT_SECS: u64 = 60;
pub(crate) const DEFAULT_TTI_FLUSH_SECS: u64 = 30;
pub(crate) const DEFAULT_AUTO_PRUNE_INTERVAL: u64 = 1000;
pub(crate) const DEFAULT_LRU_UPDATE_SECS: u64 = 30;
pub(crate) const DEFAULT_PRUNE_AGE_SECS: u64 = 3600;
pub(crate) const DEFAULT_PREFIX: &str = "warren";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend selector: `memory://` (default when absent) or
    /// `file:///some/dir` for the JSON-record disk backend.
    pub storage_url: Option<String>,
    /// Invalidation bus selector: absent means no cross-process
    /// invalidation, `local://` joins the in-process broadcast bus.
    pub bus_url: Option<String>,
    /// Namespace used for bus channels and key fingerprints.
    pub prefix: Option<String>,
    /// Applied when `set` is called without an explicit TTL, in seconds.
    pub default_ttl: Option<u64>,
    /// When true, a successful read pushes the entry's expiry out to
    /// `now + ttl` (time-to-idle).
    pub read_extend_ttl: bool,
    /// Hard cap on the number of entries; inserts beyond it evict the
    /// approximately least-recently-used entry.
    pub max_entries: Option<usize>,
    /// Per-value size cap; larger writes fail with `StorageIsFull`.
    pub max_value_bytes: Option<usize>,
    /// Byte budget handed to the disk backend, when one is selected.
    pub storage_max_bytes: Option<u64>,
    /// How long a waiter blocks on another caller's in-flight producer
    /// before giving up, in seconds.
    pub flight_timeout: u64,
    /// TTI extensions closer together than this are not persisted, in
    /// seconds.
    pub tti_flush_secs: u64,
    /// Wall-clock cadence of background trie pruning, in seconds.
    pub auto_prune_secs: Option<u64>,
    /// Operation-count cadence of opportunistic trie pruning.
    pub auto_prune_interval: u64,
    /// Recency stamps are rewritten at most this often, in seconds.
    pub lru_update_interval: u64,
    /// Trie nodes idle longer than this are candidates for pruning, in
    /// seconds.
    pub prune_after: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage_url: None,
            bus_url: None,
            prefix: None,
            default_ttl: None,
            read_extend_ttl: true,
            max_entries: None,
            max_value_bytes: None,
            storage_max_bytes: None,
            flight_timeout: DEFAULT_FLIGHT_TIMEOUT_SECS,
            tti_flush_secs: DEFAULT_TTI_FLUSH_SECS,
            auto_prune_secs: None,
            auto_prune_interval: DEFAULT_AUTO_PRUNE_INTERVAL,
            lru_update_interval: DEFAULT_LRU_UPDATE_SECS,
            prune_after: None,
        }
    }
}

impl CacheConfig {
    pub(crate) fn flight_timeout(&self) -> Duration {
        Duration::from_secs(self.flight_timeout)
    }

    pub(crate) fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl.map(Duration::from_secs)
    }

    pub(crate) fn prune_age(&self) -> Duration {
        Duration::from_secs(self.prune_after.unwrap_or(DEFAULT_PRUNE_AGE_SECS))
    }

    pub(crate) fn channel_prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or(DEFAULT_PREFIX)
    }
}
