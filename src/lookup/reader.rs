//! Random access to the finished lookup file
//!
//! The final lookup file is memory-mapped once and shared read-only between
//! all join workers through an [`Arc`]. Each worker owns its own
//! [`LookupReader`], whose cursor tracks the position of the last decoded
//! entry: the join visits spots in ascending order, so most fetches just
//! scan forward from where the previous one stopped. Only a target key that
//! precedes the cursor forces a fresh binary search over the sparse index.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::LookupError;
use crate::key::{self, Key};
use crate::lookup::entry;
use crate::lookup::index::SparseIndex;
use crate::{nuc, Result};

/// The shared, immutable side of the lookup file: the mapping and the index
#[derive(Clone)]
pub struct LookupFile {
    mmap: Option<Arc<Mmap>>,
    index: Arc<SparseIndex>,
}

impl LookupFile {
    /// Maps the lookup file and loads its sparse index
    pub fn open(lookup_path: &Path, index_path: &Path) -> Result<Self> {
        let file = File::open(lookup_path)?;
        let file_size = file.metadata()?.len();
        let mmap = if file_size == 0 {
            None
        } else {
            Some(Arc::new(unsafe { Mmap::map(&file)? }))
        };
        let index = Arc::new(SparseIndex::load(index_path, file_size.max(1))?);
        Ok(Self { mmap, index })
    }

    fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().map_or(&[], |m| &m[..])
    }

    /// Creates a per-worker reader over this file
    #[must_use]
    pub fn reader(&self) -> LookupReader {
        LookupReader {
            file: self.clone(),
            cursor: 0,
            last_key: None,
            words: Vec::new(),
        }
    }
}

/// A single worker's cursor into the lookup file
pub struct LookupReader {
    file: LookupFile,
    /// Byte offset of the next entry to decode
    cursor: usize,
    /// Key of the last decoded entry, if any
    last_key: Option<Key>,
    words: Vec<u64>,
}

impl LookupReader {
    /// Fetches the bases stored for (`spot_id`, `read_number`), decoded to
    /// ASCII into `out` (cleared first). `reverse` selects the reverse
    /// complement, for reads aligned to the reverse strand.
    ///
    /// A missing key is a data-consistency failure: the sequence row
    /// claimed the read was aligned, so an entry must exist.
    pub fn fetch(
        &mut self,
        spot_id: u64,
        read_number: u32,
        reverse: bool,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        out.clear();
        let target = key::encode(spot_id, read_number);
        if self.last_key.is_some_and(|k| k >= target) {
            self.cursor = self.file.index.seek_offset(target) as usize;
            self.last_key = None;
        }

        let buf = self.file.bytes();
        while self.cursor < buf.len() {
            let decoded = entry::decode_at(buf, self.cursor)?;
            self.cursor = decoded.next_offset;
            self.last_key = Some(decoded.key);
            match decoded.key.cmp(&target) {
                std::cmp::Ordering::Less => {}
                std::cmp::Ordering::Equal => {
                    nuc::unpack(
                        decoded.packed,
                        decoded.base_count as usize,
                        &mut self.words,
                        out,
                    )?;
                    if reverse {
                        nuc::revcomp_in_place(out);
                    }
                    return Ok(());
                }
                std::cmp::Ordering::Greater => break,
            }
        }
        Err(LookupError::KeyNotFound {
            spot_id,
            read_number,
        }
        .into())
    }
}
