//! Per-instance monotonic counters.
//!
//! These are plain atomics sampled through [`CacheStats`]; exporting them
//! anywhere (Prometheus, a dashboard node record) is a collaborator's job.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub(crate) struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub invalidations: AtomicU64,
    pub errors: AtomicU64,
    pub singleflight_timeouts: AtomicU64,
    pub tti_overflows: AtomicU64,
}

impl CacheMetrics {
    pub(crate) fn snapshot(&self, entries: usize) -> CacheStats {
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            singleflight_timeouts: self.singleflight_timeouts.load(Ordering::Relaxed),
            tti_overflows: self.tti_overflows.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn tick(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time counter values for one cache instance.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    #[serde(rename = "cache_hits_total")]
    pub hits: u64,
    #[serde(rename = "cache_misses_total")]
    pub misses: u64,
    #[serde(rename = "cache_invalidations_total")]
    pub invalidations: u64,
    #[serde(rename = "cache_errors_total")]
    pub errors: u64,
    #[serde(rename = "singleflight_timeouts_total")]
    pub singleflight_timeouts: u64,
    #[serde(rename = "cache_tti_overflows_total")]
    pub tti_overflows: u64,
}
