//! The in-memory representation of one cached image.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use super::bitmap::{BitmapTrimap, PlainBitmap, RectBitmap, Trimap};
use super::key::ImageKey;
use crate::config::TrimapPolicy;
use crate::geom::RectI;

/// A single cached image: planar f32 storage over `bounds`, plus the
/// trimap tracking which pixels are actually rendered.
///
/// Always accessed behind an [`ImageRef`] (`Arc<ImageSlot>`) so the cache
/// directory can hand out a handle while a render is still filling it in —
/// holders observe partial completion through the trimap, never a
/// half-written pixel buffer, because writers only touch a tile's pixels
/// after winning that tile in the trimap.
pub struct ImageSlot {
    pub key: ImageKey,
    pub bounds: RectI,
    pub num_channels: u8,
    data: RwLock<Vec<f32>>,
    trimap: Mutex<Trimap>,
    /// Guards first-time backing-store allocation so two racing callers
    /// that both won `lookup_or_create`'s directory insert don't both pay
    /// the allocation cost.
    alloc_lock: Mutex<()>,
    ram_bytes: AtomicU64,
}

pub type ImageRef = Arc<ImageSlot>;

impl ImageSlot {
    pub(super) fn new(key: ImageKey, bounds: RectI, num_channels: u8, trimap: Trimap) -> Self {
        Self {
            key,
            bounds,
            num_channels,
            data: RwLock::new(Vec::new()),
            trimap: Mutex::new(trimap),
            alloc_lock: Mutex::new(()),
            ram_bytes: AtomicU64::new(0),
        }
    }

    /// Ensures the backing pixel buffer is allocated, returning its size in
    /// bytes. Safe to call from multiple threads racing on the same slot;
    /// only the first allocates.
    pub fn ensure_allocated(&self) -> u64 {
        let _guard = self.alloc_lock.lock();
        let mut data = self.data.write();
        if data.is_empty() && self.bounds.area() > 0 {
            let n = self.bounds.area() as usize * self.num_channels as usize;
            data.resize(n, 0.0);
            let bytes = (n * std::mem::size_of::<f32>()) as u64;
            self.ram_bytes.store(bytes, Ordering::Relaxed);
            return bytes;
        }
        self.ram_bytes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn ram_bytes(&self) -> u64 {
        self.ram_bytes.load(Ordering::Relaxed)
    }

    pub fn trimap(&self) -> parking_lot::MutexGuard<'_, Trimap> {
        self.trimap.lock()
    }

    /// Direct read access to the interleaved pixel buffer. Callers restrict
    /// themselves to the sub-rectangle the trimap reports as rendered.
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, Vec<f32>> {
        self.data.read()
    }

    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, Vec<f32>> {
        self.data.write()
    }

    #[must_use]
    pub fn pixel_offset(&self, x: i32, y: i32) -> usize {
        let row = (y - self.bounds.y0) as usize;
        let col = (x - self.bounds.x0) as usize;
        (row * self.bounds.width() as usize + col) * self.num_channels as usize
    }

    /// Returns a clone of the pixel buffer if this image is fully rendered
    /// and has an allocated backing store, or `None` otherwise — the
    /// precondition [`super::ImageCache`]'s RAM-pressure eviction requires
    /// before demoting an entry to the disk tier, so a partially-rendered
    /// image (or one still racing its first allocation) is never written
    /// out half-finished.
    #[must_use]
    pub(super) fn snapshot_if_fully_rendered(&self) -> Option<Vec<f32>> {
        if self.bounds.area() <= 0 {
            return None;
        }
        if self.trimap.lock().minimal_rect(self.bounds).is_some() {
            return None;
        }
        let data = self.data.read();
        if data.is_empty() { None } else { Some(data.clone()) }
    }

    /// Reconstructs an image from bytes previously demoted to the disk
    /// tier: the whole buffer is already rendered, so the trimap starts out
    /// marked fully rendered over `bounds` rather than empty.
    #[must_use]
    pub(super) fn from_disk(key: ImageKey, bounds: RectI, num_channels: u8, data: Vec<f32>, trimap_policy: TrimapPolicy) -> Arc<Self> {
        let trimap = match trimap_policy {
            TrimapPolicy::Full => Trimap::Full(BitmapTrimap::new(bounds)),
            TrimapPolicy::Plain => Trimap::Plain(PlainBitmap::new(bounds)),
        };
        let slot = Self::new(key, bounds, num_channels, trimap);
        let bytes = (data.len() * std::mem::size_of::<f32>()) as u64;
        *slot.data.write() = data;
        slot.ram_bytes.store(bytes, Ordering::Relaxed);
        slot.trimap.lock().mark_rendered(bounds);
        Arc::new(slot)
    }

    /// Builds a fully-populated image outside the cache directory: used for
    /// the transient resample buffer produced when a transform-concatenation
    /// chain is applied. Never registered under `key` in
    /// [`super::ImageCache`] — `key` only identifies it for debugging.
    #[must_use]
    pub fn new_transient(key: ImageKey, bounds: RectI, num_channels: u8) -> ImageRef {
        let trimap = Trimap::Plain(PlainBitmap::new(bounds));
        let slot = Arc::new(Self::new(key, bounds, num_channels, trimap));
        slot.ensure_allocated();
        slot.trimap().mark_rendered(bounds);
        slot
    }
}
