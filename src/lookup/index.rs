//! Sparse index over the lookup file
//!
//! While the run merger writes the final lookup file it samples one
//! `(key, byte offset)` pair every [`DEFAULT_INDEX_STRIDE`] entries. The
//! samples are fixed-size and stored identically in memory and on disk, so
//! the whole index file is one `bytemuck` cast away from a usable slice.
//! A lookup binary-searches the samples to land within one stride window of
//! the target key, then scans forward.

use std::io::Write;
use std::path::Path;

use bytemuck::{Pod, Zeroable};

use crate::error::LookupError;
use crate::key::Key;
use crate::Result;

/// Entries between consecutive index samples
pub const DEFAULT_INDEX_STRIDE: u64 = 512;

/// One index sample: the key at a sampled entry and its byte offset in the
/// lookup file.
///
/// This is stored identically in memory and on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod, Default)]
#[repr(C)]
pub struct IndexSample {
    pub key: Key,
    pub offset: u64,
}

impl IndexSample {
    #[must_use]
    pub fn new(key: Key, offset: u64) -> Self {
        Self { key, offset }
    }
}

/// The in-memory sparse index
#[derive(Clone, Debug, Default)]
pub struct SparseIndex {
    samples: Vec<IndexSample>,
}

impl SparseIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample. Samples must arrive in ascending key order; the
    /// run merger guarantees this by construction.
    pub fn push(&mut self, key: Key, offset: u64) {
        self.samples.push(IndexSample::new(key, offset));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Byte offset of the last sampled entry with `key <= target`, or 0 if
    /// the target precedes every sample.
    #[must_use]
    pub fn seek_offset(&self, target: Key) -> u64 {
        let idx = self.samples.partition_point(|s| s.key <= target);
        if idx == 0 {
            0
        } else {
            self.samples[idx - 1].offset
        }
    }

    /// Returns the byte representation of the index
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.samples)
    }

    /// Rebuilds the index from a byte slice.
    ///
    /// An empty slice yields an empty index: a run without any aligned
    /// reads produces a zero-entry lookup file and with it a zero-sample
    /// index. Decoding copies rather than casts in place, so the byte
    /// buffer's alignment does not matter.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        if bytes.len() % std::mem::size_of::<IndexSample>() != 0 {
            return Err(LookupError::IndexCastingError.into());
        }
        Ok(Self {
            samples: bytemuck::pod_collect_to_vec(bytes),
        })
    }

    /// Writes the index to its own file next to the lookup file
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(self.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads an index file and validates its samples against the lookup
    /// file size.
    pub fn load(path: &Path, lookup_file_size: u64) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let index = Self::from_bytes(&bytes)?;
        for sample in &index.samples {
            if sample.offset >= lookup_file_size {
                return Err(
                    LookupError::IndexOutOfBounds(sample.offset, lookup_file_size).into(),
                );
            }
        }
        Ok(index)
    }
}
