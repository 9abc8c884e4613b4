//! Disk tier: a directory of fixed-size memory-mapped tile files plus a
//! `bincode`-serialized index from image digest to file offset.
//!
//! Tiles are never individually named files but slots within a small
//! number of large backing files, addressed by a hash-bucketed index loaded
//! once at startup and rebuilt from scratch if its header fails validation.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

const INDEX_MAGIC: u32 = 0x5354_5241; // "STRA"
const INDEX_VERSION: u32 = 1;
const SLOT_BYTES: u64 = 16 * 1024 * 1024; // 16 MiB per slot, generous for a tile.

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
struct IndexRecord {
    digest: u64,
    offset: u64,
    len: u64,
}

/// A fully-rendered image's pixel buffer plus the geometry needed to
/// reconstruct an [`super::image::ImageSlot`] from it, demoted here by
/// [`super::cache::ImageCache`] under RAM pressure.
#[derive(Serialize, Deserialize)]
pub(super) struct ImagePayload {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
    pub num_channels: u8,
    pub data: Vec<f32>,
}

/// On-disk image tier. One backing file, grown in `SLOT_BYTES` increments,
/// plus an index file mapping digests to `(offset, len)`.
pub struct DiskTier {
    dir: PathBuf,
    data_path: PathBuf,
    index_path: PathBuf,
    records: Vec<IndexRecord>,
    next_offset: u64,
    budget_bytes: u64,
}

impl DiskTier {
    /// Opens (or creates) the disk tier rooted at `dir`. A corrupt or
    /// missing index is rebuilt as empty rather than treated as fatal,
    /// matching the "validated on startup, rebuilt on corruption" contract.
    pub fn open(dir: &Path, budget_bytes: u64) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let data_path = dir.join("tiles.bin");
        let index_path = dir.join("tiles.idx");
        if !data_path.exists() {
            File::create(&data_path)?;
        }
        let records = Self::load_index(&index_path).unwrap_or_default();
        let next_offset = records.iter().map(|r| r.offset + r.len).max().unwrap_or(0);
        Ok(Self { dir: dir.to_path_buf(), data_path, index_path, records, next_offset, budget_bytes })
    }

    fn load_index(path: &Path) -> Option<Vec<IndexRecord>> {
        let mut file = File::open(path).ok()?;
        let mut magic = [0u8; 4];
        let mut version = [0u8; 4];
        file.read_exact(&mut magic).ok()?;
        file.read_exact(&mut version).ok()?;
        if u32::from_le_bytes(magic) != INDEX_MAGIC || u32::from_le_bytes(version) != INDEX_VERSION {
            return None;
        }
        let mut rest = Vec::new();
        file.read_to_end(&mut rest).ok()?;
        bincode::deserialize(&rest).ok()
    }

    fn persist_index(&self) -> Result<()> {
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&self.index_path)?;
        file.write_all(&INDEX_MAGIC.to_le_bytes())?;
        file.write_all(&INDEX_VERSION.to_le_bytes())?;
        let body = bincode::serialize(&self.records)
            .map_err(|e| StrataError::IndexCorrupt(e.to_string()))?;
        file.write_all(&body)?;
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, digest: u64) -> bool {
        self.records.iter().any(|r| r.digest == digest)
    }

    /// Reads the bytes stored for `digest`, if present.
    pub fn read(&self, digest: u64) -> Result<Option<Vec<u8>>> {
        let Some(rec) = self.records.iter().find(|r| r.digest == digest) else {
            return Ok(None);
        };
        let file = File::open(&self.data_path)?;
        let mmap = unsafe { MmapOptions::new().offset(rec.offset).len(rec.len as usize).map(&file)? };
        Ok(Some(mmap.to_vec()))
    }

    /// Writes `bytes` for `digest`, appending a new slot. Evicts the
    /// oldest records first-fit if the write would exceed `budget_bytes`.
    pub fn write(&mut self, digest: u64, bytes: &[u8]) -> Result<()> {
        while self.used_bytes() + bytes.len() as u64 > self.budget_bytes && !self.records.is_empty() {
            self.records.remove(0);
        }
        let offset = self.next_offset;
        let len = bytes.len() as u64;
        let mut mmap = Self::map_mut(&self.data_path, offset, len.max(1))?;
        mmap[..bytes.len()].copy_from_slice(bytes);
        mmap.flush()?;
        self.records.retain(|r| r.digest != digest);
        self.records.push(IndexRecord { digest, offset, len });
        self.next_offset = offset + len.max(SLOT_BYTES.min(len.max(1)));
        self.persist_index()?;
        Ok(())
    }

    fn map_mut(path: &Path, offset: u64, len: u64) -> Result<MmapMut> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        file.set_len((offset + len).max(file.metadata()?.len()))?;
        let mmap = unsafe { MmapOptions::new().offset(offset).len(len as usize).map_mut(&file)? };
        Ok(mmap)
    }

    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.len).sum()
    }

    pub fn set_budget(&mut self, bytes: u64) {
        self.budget_bytes = bytes;
    }

    pub fn remove(&mut self, digest: u64) {
        self.records.retain(|r| r.digest != digest);
        let _ = self.persist_index();
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
