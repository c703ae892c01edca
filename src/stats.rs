//! Per-run join counters
//!
//! Each worker owns its own [`JoinStats`] and the coordinator folds them
//! together after joining the threads, so no synchronization is needed on the
//! hot path.

use std::fmt;

/// Counters accumulated while joining
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JoinStats {
    /// Spots (rows of the sequence source) visited
    pub spots_read: u64,
    /// Individual reads visited, before any filtering
    pub reads_read: u64,
    /// Reads that made it into an output record
    pub reads_written: u64,
    /// Reads skipped because their length was zero
    pub reads_zero_length: u64,
    /// Reads skipped because they were technical and technical reads were excluded
    pub reads_technical: u64,
    /// Reads skipped by the minimum-length filter
    pub reads_too_short: u64,
    /// Rows skipped because bases and quality disagreed in length
    pub reads_invalid: u64,
}

impl JoinStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds another worker's counters into this one, field by field
    pub fn merge(&mut self, other: &JoinStats) {
        self.spots_read += other.spots_read;
        self.reads_read += other.reads_read;
        self.reads_written += other.reads_written;
        self.reads_zero_length += other.reads_zero_length;
        self.reads_technical += other.reads_technical;
        self.reads_too_short += other.reads_too_short;
        self.reads_invalid += other.reads_invalid;
    }
}

/// Renders the counters as the end-of-run report. The first three lines are
/// always present; the remaining counters only appear when non-zero.
impl fmt::Display for JoinStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "spots read      : {}", self.spots_read)?;
        writeln!(f, "reads read      : {}", self.reads_read)?;
        writeln!(f, "reads written   : {}", self.reads_written)?;
        if self.reads_zero_length > 0 {
            writeln!(f, "reads 0-length  : {}", self.reads_zero_length)?;
        }
        if self.reads_technical > 0 {
            writeln!(f, "technical reads : {}", self.reads_technical)?;
        }
        if self.reads_too_short > 0 {
            writeln!(f, "reads too short : {}", self.reads_too_short)?;
        }
        if self.reads_invalid > 0 {
            writeln!(f, "reads invalid   : {}", self.reads_invalid)?;
        }
        Ok(())
    }
}
