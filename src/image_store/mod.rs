//! Image & tile store (C1).
//!
//! A two-tier cache (RAM directory + optional memory-mapped disk tier) of
//! rendered images, keyed by node identity, node-hash, time, view and
//! mip-level. See [`ImageCache`] for the directory API and
//! [`bitmap::Trimap`] for the per-image render-state tracking that lets
//! concurrent renders share partially-completed images safely.

mod bitmap;
mod cache;
mod disk;
mod image;
mod key;

pub use bitmap::{BitmapTrimap, PixelState, PlainBitmap, RectBitmap, Trimap};
pub use cache::ImageCache;
pub use disk::DiskTier;
pub use image::{ImageRef, ImageSlot};
pub use key::ImageKey;
