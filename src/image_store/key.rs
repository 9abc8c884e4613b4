//! Cache keys.

use crate::node::NodeId;

/// Identity of a cached image: which node produced it, at what node-hash,
/// time, view and mip-level.
///
/// `holder` is kept alongside the hash/time/view/mip tuple (rather than
/// derived from it) so [`super::ImageCache::remove_all_with_holder`] can
/// evict every image a node ever produced without needing to recompute or
/// remember every hash that node has taken on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub holder: NodeId,
    pub node_hash: u64,
    pub time_bits: u64,
    pub view: u32,
    pub mip_level: u32,
    /// Number of components (e.g. 4 for RGBA) the cached buffer was
    /// allocated with — part of the key so two requests for the same node
    /// output at different component counts never alias the same entry.
    pub components: u8,
}

impl ImageKey {
    #[must_use]
    pub fn new(holder: NodeId, node_hash: u64, time: f64, view: u32, mip_level: u32, components: u8) -> Self {
        Self { holder, node_hash, time_bits: time.to_bits(), view, mip_level, components }
    }

    #[must_use]
    pub fn time(&self) -> f64 {
        f64::from_bits(self.time_bits)
    }

    /// A stable 64-bit digest of this key, used as the on-disk index key —
    /// the index stores digests rather than the full key so it does not
    /// need to serialize [`NodeId`]'s internal slotmap representation.
    ///
    /// Uses `xxh3` rather than the in-memory directory's `FxHashMap` hasher:
    /// this digest is persisted to disk and compared across process runs,
    /// so it needs to be stable and well-distributed rather than merely
    /// fast for a single process's hash table.
    #[must_use]
    pub fn digest(&self) -> u64 {
        let mut bytes = [0u8; 25];
        bytes[0..8].copy_from_slice(&self.node_hash.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.time_bits.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.view.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.mip_level.to_le_bytes());
        bytes[24] = self.components;
        xxhash_rust::xxh3::xxh3_64(&bytes)
    }
}
