//! Stable key fingerprinting.
//!
//! Cache keys are opaque strings; callers that memoize function results
//! build them by fingerprinting the callable's identity plus a canonical
//! rendering of its arguments. The hash uses fixed seeds so keys stay
//! stable across program runs and across processes sharing a storage
//! backend. Callers are responsible for rendering arguments canonically;
//! two renderings that differ byte-wise are two different keys.

use ahash::RandomState;
use std::hash::{BuildHasher, Hasher};

// Fixed seeds keep the fingerprint deterministic across runs.
fn build_state() -> RandomState {
    RandomState::with_seeds(
        0x9e37_79b9_7f4a_7c15,
        0x2545_f491_4f6c_dd1d,
        0x4242_4242_4242_4242,
        0x1357_9bdf_0246_8ace,
    )
}

/// Hash a single string to a stable hex token. Used internally for
/// filesystem-safe names derived from keys.
pub(crate) fn stable_hash_hex(input: &str) -> String {
    format!("{:x}", build_state().hash_one(input))
}

/// Build a cache key from an optional namespace and a sequence of
/// canonical parts (function name, rendered arguments, and so on).
///
/// Parts are length-prefixed before hashing, so `["ab", "c"]` and
/// `["a", "bc"]` produce different keys.
pub fn fingerprint<I, S>(namespace: Option<&str>, parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = build_state().build_hasher();
    for part in parts {
        let bytes = part.as_ref();
        hasher.write_usize(bytes.len());
        hasher.write(bytes);
    }
    let digest = hasher.finish();
    match namespace {
        Some(ns) => format!("{ns}:{digest:x}"),
        None => format!("{digest:x}"),
    }
}
