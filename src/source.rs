//! Row-source interfaces
//!
//! The storage engine behind the archive is an external collaborator; this
//! crate only consumes row-cursor style access to two tables. Callers (and
//! the test suite) provide implementations of [`SequenceSource`] and
//! [`AlignmentSource`]; everything downstream works in terms of
//! [`SpotRecord`] and [`AlignmentRow`].

use crate::Result;

/// Read-type flag: the read is biological (not a barcode/index read)
pub const READ_TYPE_BIOLOGICAL: u8 = 0x01;
/// Read-type flag: forward orientation
pub const READ_TYPE_FORWARD: u8 = 0x02;
/// Read-type flag: reverse orientation
pub const READ_TYPE_REVERSE: u8 = 0x04;

/// One row of the sequence table, materialized per the run's
/// [`FieldSelection`] and discarded immediately after processing.
#[derive(Clone, Debug, Default)]
pub struct SpotRecord {
    pub row_id: i64,
    /// Alignment ids of reads 1 and 2; 0 means the read is unaligned and its
    /// bases are stored inline
    pub alignment_ids: [u64; 2],
    /// Per-read lengths; their sum is the spot length
    pub read_lengths: Vec<u32>,
    /// Per-read type flags (`READ_TYPE_*`)
    pub read_types: Vec<u8>,
    pub name: Vec<u8>,
    /// Bases stored inline in the row: the unaligned reads, concatenated
    pub inline_bases: Vec<u8>,
    /// Quality for the whole spot (all reads, aligned or not)
    pub quality: Vec<u8>,
    pub spot_group: Vec<u8>,
}

impl SpotRecord {
    /// Number of reads in the spot
    #[must_use]
    pub fn num_reads(&self) -> usize {
        self.read_lengths.len()
    }

    /// Total spot length, summed over all reads
    #[must_use]
    pub fn spot_len(&self) -> usize {
        self.read_lengths.iter().map(|&l| l as usize).sum()
    }

    /// Length of read `idx` (0-based)
    #[must_use]
    pub fn read_len(&self, idx: usize) -> usize {
        self.read_lengths[idx] as usize
    }

    /// True if read `idx` carries the biological flag
    #[must_use]
    pub fn is_biological(&self, idx: usize) -> bool {
        self.read_types
            .get(idx)
            .is_none_or(|t| t & READ_TYPE_BIOLOGICAL != 0)
    }

    /// True if read `idx` is flagged reverse-oriented
    #[must_use]
    pub fn is_reverse(&self, idx: usize) -> bool {
        self.read_types
            .get(idx)
            .is_some_and(|t| t & READ_TYPE_REVERSE != 0)
    }

    /// True if read `idx` is aligned (non-zero alignment id)
    #[must_use]
    pub fn is_aligned(&self, idx: usize) -> bool {
        self.alignment_ids[idx] != 0
    }
}

/// One row of the alignment table: the bases of an aligned read, in forward
/// orientation, keyed by the spot it belongs to.
#[derive(Clone, Debug)]
pub struct AlignmentRow {
    pub spot_id: u64,
    /// Read-in-pair number, 1 or 2
    pub read_number: u32,
    pub bases: Vec<u8>,
}

/// Which optional columns of the sequence table to materialize. Skipping
/// unused columns avoids their decoding cost.
#[derive(Clone, Copy, Debug)]
pub struct FieldSelection {
    pub with_name: bool,
    pub with_quality: bool,
    pub with_read_type: bool,
    pub with_spot_group: bool,
}

impl Default for FieldSelection {
    fn default() -> Self {
        Self {
            with_name: true,
            with_quality: true,
            with_read_type: true,
            with_spot_group: false,
        }
    }
}

/// Range-restricted access to the sequence table
pub trait SequenceSource: Send + Sync {
    /// Accession string used in header lines
    fn accession(&self) -> &str;

    /// Total number of rows
    fn row_count(&self) -> Result<u64>;

    /// True if the table carries a NAME column
    fn has_name_column(&self) -> bool;

    /// Opens an iterator over `count` rows starting at `first_row`
    fn open_range(
        &self,
        first_row: i64,
        count: u64,
        fields: &FieldSelection,
    ) -> Result<Box<dyn Iterator<Item = Result<SpotRecord>> + Send + '_>>;
}

/// Range-restricted access to the alignment table
pub trait AlignmentSource: Send + Sync {
    /// Total number of rows
    fn row_count(&self) -> Result<u64>;

    /// Opens an iterator over `count` rows starting at `first_row`
    fn open_range(
        &self,
        first_row: i64,
        count: u64,
    ) -> Result<Box<dyn Iterator<Item = Result<AlignmentRow>> + Send + '_>>;
}
