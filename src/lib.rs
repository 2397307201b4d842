//! # Warren
//!
//! An in-process memoization cache with dependency-driven invalidation.
//!
//! Every cached entry carries a set of hierarchical string tags. When a
//! tag is invalidated, entries depending on it, on any prefix of it, or
//! on anything beneath it go stale on their next read, in time
//! proportional to the entry's tag paths and without touching other
//! entries. On top of that core the cache provides:
//!
//! - **Singleflight**: concurrent misses on one key admit a single
//!   producer; everyone else waits for its result (with a timeout) or
//!   retries when it fails.
//! - **TTL and TTI**: per-entry expiry, optionally extended by reads.
//! - **Bounded capacity** with approximate least-recently-used eviction.
//! - **Pluggable storage** (in-memory map, JSON-record directory) and a
//!   best-effort **invalidation bus** for propagating tag invalidations
//!   between instances.
//!
//! ## Reading, writing, invalidating
//!
//! ```
//! use warren_cache::{Cache, CacheConfig};
//!
//! # fn main() -> warren_cache::Result<()> {
//! let cache = Cache::new(CacheConfig::default())?;
//! cache.set("user:42:profile", br#"{"name":"Ada"}"#, &["org:1:user:42"], None)?;
//! assert!(cache.get("user:42:profile")?.is_some());
//!
//! // Invalidating a prefix takes out everything beneath it.
//! cache.invalidate("org:1")?;
//! assert!(cache.get("user:42:profile")?.is_none());
//! # Ok(())
//! # }
//! ```
//!
//! ## Coalescing concurrent producers
//!
//! ```no_run
//! use std::sync::Arc;
//! use warren_cache::{Cache, CacheConfig};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let cache = Arc::new(Cache::new(CacheConfig::default())?);
//! let report = cache
//!     .get_or_compute("report:2024", &["reports:2024"], None, || async {
//!         // Runs at most once no matter how many callers race here.
//!         Ok(b"expensive result".to_vec())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Allow internal modules to reference the crate by its library name
extern crate self as warren_cache;

pub mod bus;
mod cache;
mod clock;
mod config;
mod entry;
mod error;
mod flight;
pub mod global;
mod keys;
mod metrics;
pub mod storage;
mod store;
mod tag;
mod trie;

// Re-export the commonly used types at the crate root
pub use bus::{Bus, LocalBus};
pub use cache::{Cache, GetOrEnter};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use flight::{FlightOutcome, FlightPermit, FlightWaiter};
pub use keys::fingerprint;
pub use metrics::CacheStats;
pub use storage::{DiskStorage, MemoryStorage, Storage};
pub use tag::validate_tag;
