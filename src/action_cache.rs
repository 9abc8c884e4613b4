//! Action cache (C2): per-node memoization of the declarative actions
//! (region of definition, identity, frames-needed, time domain) a node
//! reports for a given `(time, view, mip_level)`.
//!
//! Stored inline on the node's [`crate::node::NodeSlot`] rather than in a
//! global directory — each node's cache is independent, so a
//! `parking_lot::RwLock` per node is simple and avoids directory-wide
//! contention (§5: "The action cache is per-node with a simple rwlock").

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::geom::RectD;
use crate::node::{Identity, TimeRange};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ActionKey {
    time_bits: u64,
    view: u32,
    mip_level: u32,
}

/// The four memoized actions for one `(time, view, mip_level)` visit.
#[derive(Clone, Debug)]
pub struct ActionCacheEntry {
    pub region_of_definition: RectD,
    pub identity: Identity,
    pub frames_needed: rustc_hash::FxHashMap<u32, rustc_hash::FxHashMap<u32, smallvec::SmallVec<[TimeRange; 2]>>>,
    pub time_domain: (f64, f64),
}

/// Per-node memoization table, wholesale-invalidated whenever the node's
/// declared hash changes (§4.2).
pub struct ActionCache {
    last_hash: AtomicU64,
    entries: RwLock<FxHashMap<ActionKey, Arc<ActionCacheEntry>>>,
}

impl Default for ActionCache {
    fn default() -> Self {
        Self { last_hash: AtomicU64::new(0), entries: RwLock::new(FxHashMap::default()) }
    }
}

impl ActionCache {
    /// Returns the cached entry for `(hash, time, view, mip_level)`,
    /// computing and inserting it via `compute` if absent. If `hash` has
    /// changed since the last call the whole table is dropped first (§4.2).
    ///
    /// Uses an "insert-if-absent" path under one write-lock acquisition so
    /// two threads racing to plan the same `(node, time, view)` see exactly
    /// one evaluation of `compute` — the loser simply reads back what the
    /// winner inserted, rather than storing a second result under a new
    /// key (§8: "plan construction serializes per `(node, time, view)`").
    pub fn get_or_compute(
        &self,
        hash: u64,
        time: f64,
        view: u32,
        mip_level: u32,
        compute: impl FnOnce() -> Result<ActionCacheEntry>,
    ) -> Result<Arc<ActionCacheEntry>> {
        let key = ActionKey { time_bits: time.to_bits(), view, mip_level };

        if self.last_hash.swap(hash, Ordering::AcqRel) != hash {
            self.entries.write().clear();
        }

        {
            let read = self.entries.read();
            if let Some(entry) = read.get(&key) {
                return Ok(entry.clone());
            }
        }

        let mut write = self.entries.write();
        // Re-check: another thread may have inserted while we waited for
        // the write lock.
        if let Some(entry) = write.get(&key) {
            return Ok(entry.clone());
        }
        let computed = Arc::new(compute()?);
        write.insert(key, computed.clone());
        Ok(computed)
    }

    pub fn invalidate(&self) {
        self.entries.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_change_invalidates_wholesale() {
        let cache = ActionCache::default();
        cache
            .get_or_compute(1, 1.0, 0, 0, || {
                Ok(ActionCacheEntry {
                    region_of_definition: RectD::EMPTY,
                    identity: Identity::NotIdentity,
                    frames_needed: rustc_hash::FxHashMap::default(),
                    time_domain: (0.0, 0.0),
                })
            })
            .unwrap();
        assert_eq!(cache.len(), 1);
        cache
            .get_or_compute(2, 1.0, 0, 0, || {
                Ok(ActionCacheEntry {
                    region_of_definition: RectD::EMPTY,
                    identity: Identity::NotIdentity,
                    frames_needed: rustc_hash::FxHashMap::default(),
                    time_domain: (0.0, 0.0),
                })
            })
            .unwrap();
        assert_eq!(cache.len(), 1, "old hash's entries must be gone, not accumulated");
    }

    #[test]
    fn second_lookup_does_not_recompute() {
        let cache = ActionCache::default();
        let calls = std::cell::Cell::new(0);
        for _ in 0..2 {
            cache
                .get_or_compute(1, 1.0, 0, 0, || {
                    calls.set(calls.get() + 1);
                    Ok(ActionCacheEntry {
                        region_of_definition: RectD::EMPTY,
                        identity: Identity::NotIdentity,
                        frames_needed: rustc_hash::FxHashMap::default(),
                        time_domain: (0.0, 0.0),
                    })
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 1);
    }
}
