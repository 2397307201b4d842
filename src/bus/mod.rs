//! Invalidation bus.
//!
//! The bus is a best-effort pub/sub transport: instances publish tag
//! invalidations and apply the ones they receive. Payloads are
//! `{tag}|{timestamp}` on channel `{prefix}:invalidate`; the pipe is safe
//! as a separator because it can never appear in a valid tag. Delivery is
//! eventually consistent and may echo an instance its own messages; the
//! subscriber applies them locally and never re-publishes.

mod local;

pub use local::LocalBus;

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;

use crate::error::{CacheError, Result};

pub trait Bus: Send + Sync + 'static {
    /// Fire-and-forget publish. Publishing with no subscribers is not an
    /// error.
    fn publish(&self, channel: &str, payload: &[u8]) -> Result<()>;

    /// Open a subscription. Backends pump messages into the returned
    /// channel, so this must be called from within a tokio runtime.
    fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<Vec<u8>>>;
}

/// Resolve a bus URL. No URL means no cross-process invalidation.
pub(crate) fn open(url: Option<&str>) -> Result<Option<Arc<dyn Bus>>> {
    let Some(url) = url else {
        return Ok(None);
    };
    let (scheme, _) = url
        .split_once("://")
        .ok_or_else(|| CacheError::Storage(anyhow!("malformed bus url {url:?}")))?;
    match scheme {
        "local" => Ok(Some(LocalBus::shared())),
        other => Err(CacheError::Storage(anyhow!(
            "unsupported bus scheme {other:?} in {url:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_url_means_no_bus() {
        assert!(open(None).unwrap().is_none());
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(open(Some("redis://localhost:6379")).is_err());
    }

    #[test]
    fn local_scheme_resolves() {
        assert!(open(Some("local://")).unwrap().is_some());
    }
}
