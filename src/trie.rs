//! Prefix trie of invalidation counters, one node per observed tag prefix.
//!
//! Each node carries two monotonic clocks: `counter` ticks when this exact
//! tag is invalidated, `subtree` ticks when this tag or anything below it is
//! invalidated. An entry written under tag `T` records a witness derived
//! from `T`'s path; a later read proves freshness by confirming that no
//! clock the witness depends on has moved. Readers walk the path under a
//! short read latch; structural growth takes the write latch. The counters
//! themselves are atomics, so concurrent invalidations of the same tag
//! serialize on the node without blocking readers.
//!
//! The witness for tag `T` is the pair:
//!
//! * `counter`: `T`'s own counter, which moves only when `T` itself is
//!   invalidated;
//! * `clock`: the sum of every strict ancestor's `counter` plus `T`'s
//!   `subtree`. Invalidating an ancestor of `T` bumps that ancestor's
//!   counter, invalidating `T` or a descendant bumps `T`'s subtree, so any
//!   event that should stale an entry tagged `T` moves the clock. Sibling
//!   invalidations move neither term, which keeps unrelated entries alive.
//!
//! On top of the witness, each entry keeps the last `subtree` value it saw
//! on the path's first node. That node ticks on every event under its
//! namespace, so while it is unchanged the whole walk can be skipped. When
//! a sibling invalidation moves it without staling the entry, the hit path
//! refreshes the observation in place and the next read is O(1) again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::clock::now_ms;
use crate::tag::segments;

struct TrieNode {
    counter: AtomicU64,
    subtree: AtomicU64,
    last_access: AtomicU64,
    children: HashMap<String, TrieNode>,
}

impl TrieNode {
    fn new(now: u64) -> Self {
        Self {
            counter: AtomicU64::new(0),
            subtree: AtomicU64::new(0),
            last_access: AtomicU64::new(now),
            children: HashMap::new(),
        }
    }
}

/// Witness values captured for one tag at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TagStamp {
    pub counter: u64,
    pub clock: u64,
    pub observed: u64,
}

impl TagStamp {
    /// The witness a fresh clock would hand out: valid until anything on
    /// the tag's path is invalidated.
    pub(crate) const EPOCH_START: TagStamp = TagStamp {
        counter: 0,
        clock: 0,
        observed: 0,
    };
}

/// Outcome of checking one tag witness against the current clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagValidity {
    /// The witness still holds. `observed_now` is the current first-node
    /// subtree value; callers store it back so the next check can take the
    /// single-comparison fast path.
    Valid { observed_now: u64 },
    Stale,
}

// Clock bumps saturate instead of wrapping. A saturated clock exceeds every
// witness captured before it saturated, so those entries read as
// permanently stale rather than accidentally fresh.
fn bump(cell: &AtomicU64) {
    let _ = cell.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_add(1));
}

pub(crate) struct TagTrie {
    root: RwLock<TrieNode>,
}

impl TagTrie {
    pub(crate) fn new() -> Self {
        Self {
            root: RwLock::new(TrieNode::new(now_ms())),
        }
    }

    /// Capture the witness for `tag`, creating its path if this is the
    /// first time the tag is referenced. A fresh path yields a zero stamp.
    pub(crate) fn snapshot(&self, tag: &str) -> TagStamp {
        let now = now_ms();
        {
            let root = self.root.read();
            if let Some(stamp) = stamp_existing(&root, tag, now) {
                return stamp;
            }
        }

        let mut root = self.root.write();
        let segs: Vec<&str> = segments(tag).collect();
        let mut acc = 0u64;
        let mut observed = 0u64;
        let mut node = &mut *root;
        for (i, seg) in segs.iter().enumerate() {
            let child = node
                .children
                .entry((*seg).to_string())
                .or_insert_with(|| TrieNode::new(now));
            child.last_access.store(now, Ordering::Relaxed);
            if i == 0 {
                observed = child.subtree.load(Ordering::Acquire);
            }
            if i + 1 == segs.len() {
                return TagStamp {
                    counter: child.counter.load(Ordering::Acquire),
                    clock: acc.saturating_add(child.subtree.load(Ordering::Acquire)),
                    observed,
                };
            }
            acc = acc.saturating_add(child.counter.load(Ordering::Acquire));
            node = child;
        }
        unreachable!("validated tags have at least one segment");
    }

    /// Check a witness. A path that was never created (or was pruned, which
    /// only happens to all-zero nodes) means the tag was never invalidated.
    pub(crate) fn check(&self, tag: &str, stamp: &TagStamp) -> TagValidity {
        let now = now_ms();
        let root = self.root.read();
        let segs: Vec<&str> = segments(tag).collect();

        let Some(first) = root.children.get(segs[0]) else {
            return TagValidity::Valid { observed_now: 0 };
        };
        let top = first.subtree.load(Ordering::Acquire);
        first.last_access.store(now, Ordering::Relaxed);
        if top == stamp.observed {
            // Nothing under this namespace has moved since the entry last
            // looked; skip the walk.
            return TagValidity::Valid { observed_now: top };
        }

        let mut acc = 0u64;
        let mut node = first;
        for (i, seg) in segs.iter().enumerate() {
            if i > 0 {
                match node.children.get(*seg) {
                    Some(child) => node = child,
                    // The remaining suffix was never invalidated; what we
                    // accumulated so far decides the outcome.
                    None => {
                        return if acc > stamp.clock {
                            TagValidity::Stale
                        } else {
                            TagValidity::Valid { observed_now: top }
                        };
                    }
                }
                node.last_access.store(now, Ordering::Relaxed);
            }
            if i + 1 == segs.len() {
                let own = node.counter.load(Ordering::Acquire);
                let clock = acc.saturating_add(node.subtree.load(Ordering::Acquire));
                return if own > stamp.counter || clock > stamp.clock {
                    TagValidity::Stale
                } else {
                    TagValidity::Valid { observed_now: top }
                };
            }
            acc = acc.saturating_add(node.counter.load(Ordering::Acquire));
        }
        unreachable!("validated tags have at least one segment");
    }

    /// Tick the clocks for `tag`: every node along the path gets a subtree
    /// bump, the leaf additionally gets a counter bump.
    pub(crate) fn invalidate(&self, tag: &str) {
        let now = now_ms();
        {
            let root = self.root.read();
            if bump_existing(&root, tag, now) {
                return;
            }
        }

        let mut root = self.root.write();
        let segs: Vec<&str> = segments(tag).collect();
        let mut node = &mut *root;
        for (i, seg) in segs.iter().enumerate() {
            let child = node
                .children
                .entry((*seg).to_string())
                .or_insert_with(|| TrieNode::new(now));
            child.last_access.store(now, Ordering::Relaxed);
            bump(&child.subtree);
            if i + 1 == segs.len() {
                bump(&child.counter);
                return;
            }
            node = child;
        }
    }

    /// Drop idle nodes. A node goes only when it has been idle past
    /// `max_age`, has no children left after the sweep, and both of its
    /// clocks are still zero. A pruned node therefore re-reads as "never
    /// invalidated", which is exactly what its clocks said, so no stored
    /// witness can turn falsely valid.
    pub(crate) fn prune(&self, max_age: Duration) {
        let cutoff = now_ms().saturating_sub(max_age.as_millis() as u64);
        let mut root = self.root.write();
        prune_children(&mut root, cutoff);
    }

    pub(crate) fn reset(&self) {
        *self.root.write() = TrieNode::new(now_ms());
    }

    /// Number of nodes currently in the trie (excluding the root).
    pub(crate) fn node_count(&self) -> usize {
        fn count(node: &TrieNode) -> usize {
            node.children.values().map(|c| 1 + count(c)).sum()
        }
        count(&self.root.read())
    }
}

fn stamp_existing(root: &TrieNode, tag: &str, now: u64) -> Option<TagStamp> {
    let mut acc = 0u64;
    let mut observed = 0u64;
    let mut node = root;
    let segs: Vec<&str> = segments(tag).collect();
    for (i, seg) in segs.iter().enumerate() {
        let child = node.children.get(*seg)?;
        child.last_access.store(now, Ordering::Relaxed);
        if i == 0 {
            observed = child.subtree.load(Ordering::Acquire);
        }
        if i + 1 == segs.len() {
            return Some(TagStamp {
                counter: child.counter.load(Ordering::Acquire),
                clock: acc.saturating_add(child.subtree.load(Ordering::Acquire)),
                observed,
            });
        }
        acc = acc.saturating_add(child.counter.load(Ordering::Acquire));
        node = child;
    }
    None
}

// Returns false without touching anything when part of the path is missing.
fn bump_existing(root: &TrieNode, tag: &str, now: u64) -> bool {
    let mut path = Vec::new();
    let mut node = root;
    for seg in segments(tag) {
        match node.children.get(seg) {
            Some(child) => {
                path.push(child);
                node = child;
            }
            None => return false,
        }
    }
    for n in &path {
        n.last_access.store(now, Ordering::Relaxed);
        bump(&n.subtree);
    }
    if let Some(leaf) = path.last() {
        bump(&leaf.counter);
    }
    true
}

fn prune_children(node: &mut TrieNode, cutoff: u64) {
    node.children.retain(|_, child| {
        prune_children(child, cutoff);
        let idle = child.last_access.load(Ordering::Relaxed) < cutoff;
        let clean = child.counter.load(Ordering::Relaxed) == 0
            && child.subtree.load(Ordering::Relaxed) == 0;
        !(idle && clean && child.children.is_empty())
    });
}
