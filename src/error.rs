use std::time::Duration;

/// Errors surfaced by the cache API.
///
/// Caller errors (`InvalidTag`) are raised before any state is mutated.
/// Resource errors (`StorageIsFull`) leave the cache unchanged. Coordination
/// errors (`LeaderTimeout`) only affect the timed-out waiter. Everything a
/// backend reports beyond its capacity signal is propagated opaquely through
/// `Storage`.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("invalid tag {tag:?}: {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("storage is full")]
    StorageIsFull,

    #[error("timed out after {0:?} waiting for the in-flight producer")]
    LeaderTimeout(Duration),

    #[error("cache already configured with different settings")]
    AlreadyConfigured,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl CacheError {
    pub(crate) fn invalid_tag(tag: &str, reason: impl Into<String>) -> Self {
        CacheError::InvalidTag {
            tag: tag.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
