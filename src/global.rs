//! Process-global default cache.
//!
//! Libraries that memoize at call sites usually want one shared cache per
//! process without threading a handle everywhere. This module keeps a
//! lazily-built [`Cache`] behind [`configure`]: call it once at startup,
//! then use the free functions (or grab the instance with [`cache`]).
//! Re-configuring with identical settings is a no-op; conflicting
//! settings are an error. Prefer explicit [`Cache`] values in tests and
//! call [`reset`] between tests that must touch the global.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::cache::Cache;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::metrics::CacheStats;

#[derive(Default)]
struct GlobalState {
    config: Option<CacheConfig>,
    cache: Option<Arc<Cache>>,
}

static STATE: Lazy<RwLock<GlobalState>> = Lazy::new(Default::default);

/// Set the configuration the global cache will be built with. Idempotent
/// for identical settings; conflicting settings after the first call (or
/// after the cache was already built) are rejected.
pub fn configure(config: CacheConfig) -> Result<()> {
    let mut state = STATE.write();
    if let Some(existing) = &state.config {
        if *existing != config {
            return Err(CacheError::AlreadyConfigured);
        }
        return Ok(());
    }
    state.config = Some(config);
    Ok(())
}

/// The global instance, built on first use from the configured (or
/// default) settings.
pub fn cache() -> Result<Arc<Cache>> {
    {
        let state = STATE.read();
        if let Some(cache) = &state.cache {
            return Ok(cache.clone());
        }
    }
    let mut state = STATE.write();
    if let Some(cache) = &state.cache {
        return Ok(cache.clone());
    }
    let config = state.config.clone().unwrap_or_default();
    let built = Arc::new(Cache::new(config.clone())?);
    state.config = Some(config);
    state.cache = Some(built.clone());
    Ok(built)
}

pub fn get(key: &str) -> Result<Option<Vec<u8>>> {
    cache()?.get(key)
}

pub fn set(key: &str, value: &[u8], tags: &[&str], ttl: Option<Duration>) -> Result<()> {
    cache()?.set(key, value, tags, ttl)
}

pub fn invalidate(tag: &str) -> Result<()> {
    cache()?.invalidate(tag)
}

pub fn clear() -> Result<()> {
    cache()?.clear()
}

pub fn prune(max_age: Duration) -> Result<()> {
    cache()?.prune(max_age);
    Ok(())
}

pub fn stats() -> Result<CacheStats> {
    Ok(cache()?.stats())
}

/// Drop the global instance and its configuration. Entries in a
/// persistent backend survive; in-memory state does not.
pub fn reset() {
    *STATE.write() = GlobalState::default();
}
