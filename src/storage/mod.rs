//! Pluggable value storage.
//!
//! The cache core treats storage as a flat byte-oriented key/value map and
//! keeps all dependency metadata inside the stored records, so a backend
//! never needs to understand tags. Backends must be safe for concurrent
//! readers; the singleflight layer guarantees a single writer per key.
//!
//! Capacity exhaustion is the one condition a backend must report
//! distinctly ([`CacheError::StorageIsFull`]); anything transient is
//! propagated as an opaque storage failure.

mod disk;
mod memory;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

use std::sync::Arc;

use anyhow::anyhow;

use crate::error::{CacheError, Result};

pub trait Storage: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn iter_keys(&self) -> Result<Vec<String>>;
    fn clear(&self) -> Result<()>;
}

/// Resolve a storage URL to a backend. No URL means the in-memory map.
pub(crate) fn open(url: Option<&str>, max_bytes: Option<u64>) -> Result<Arc<dyn Storage>> {
    let Some(url) = url else {
        return Ok(Arc::new(MemoryStorage::new()));
    };
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| CacheError::Storage(anyhow!("malformed storage url {url:?}")))?;
    match scheme {
        "memory" => Ok(Arc::new(MemoryStorage::new())),
        "file" => Ok(Arc::new(DiskStorage::open(rest.as_ref(), max_bytes)?)),
        other => Err(CacheError::Storage(anyhow!(
            "unsupported storage scheme {other:?} in {url:?}"
        ))),
    }
}
