//! Tag validation and segmentation.
//!
//! A tag is a non-empty ASCII string split into hierarchical segments by
//! colons: `org:1:user:42` is the path `[org, 1, user, 42]`. The pipe
//! character is reserved for the invalidation bus wire format, so it can
//! never appear in a tag.

use crate::error::{CacheError, Result};

pub(crate) const SEGMENT_SEPARATOR: char = ':';

/// Check a tag against the charset and shape rules.
///
/// Rejected before any cache state is touched: empty tags, empty segments
/// (leading, trailing or doubled colons), non-ASCII bytes, whitespace,
/// control characters and `|`.
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(CacheError::invalid_tag(tag, "tag must not be empty"));
    }
    for ch in tag.chars() {
        if ch == '|' || ch.is_whitespace() {
            return Err(CacheError::invalid_tag(
                tag,
                format!("invalid character {ch:?}"),
            ));
        }
        if !ch.is_ascii() || ch.is_ascii_control() {
            return Err(CacheError::invalid_tag(
                tag,
                format!("invalid character {ch:?}"),
            ));
        }
    }
    if tag.split(SEGMENT_SEPARATOR).any(str::is_empty) {
        return Err(CacheError::invalid_tag(tag, "empty path segment"));
    }
    Ok(())
}

/// Iterate the path segments of an already-validated tag.
pub(crate) fn segments(tag: &str) -> impl Iterator<Item = &str> {
    tag.split(SEGMENT_SEPARATOR)
}
