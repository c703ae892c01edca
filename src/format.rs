//! Output format and layout policies
//!
//! The eight output modes are a composition of two orthogonal choices: the
//! record serialization ([`FormatKind`]) and the routing of a spot's reads to
//! destination streams ([`Layout`]). Destination ids are small integers; the
//! registry maps id 0 to the caller's path and ids 1/2 to the `_1`/`_2`
//! variants of it.

/// Record serialization: four lines with quality, or two lines without
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatKind {
    Fastq,
    Fasta,
}

impl FormatKind {
    /// True if records of this format carry a quality line
    #[must_use]
    pub fn has_quality(self) -> bool {
        matches!(self, FormatKind::Fastq)
    }
}

/// Routing of a spot's reads to records and destination streams
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// One record per spot, both reads concatenated, one stream
    WholeSpot,
    /// One record per read, all records in one stream
    SplitSpot,
    /// One record per read, read 1 and read 2 in distinct streams
    SplitFile,
    /// Like split-file, but reads whose mate was filtered out go to a
    /// separate unpaired stream
    Split3,
}

impl Layout {
    /// Destination ids a registry must provide for this layout
    #[must_use]
    pub fn destinations(self) -> &'static [u32] {
        match self {
            Layout::WholeSpot | Layout::SplitSpot => &[0],
            Layout::SplitFile => &[1, 2],
            Layout::Split3 => &[0, 1, 2],
        }
    }

    /// Destination id for one read of a paired spot.
    ///
    /// `mate_survives` is whether the other read also passed filtering; it
    /// only matters for split-3, where singleton survivors go to the
    /// unpaired stream (id 0).
    #[must_use]
    pub fn dest_for_pair(self, read_number: u32, mate_survives: bool) -> u32 {
        match self {
            Layout::WholeSpot | Layout::SplitSpot => 0,
            Layout::SplitFile => read_number,
            Layout::Split3 => {
                if mate_survives {
                    read_number
                } else {
                    0
                }
            }
        }
    }

    /// Destination id for the read of a single-read spot
    #[must_use]
    pub fn dest_for_single(self) -> u32 {
        match self {
            Layout::SplitFile => 1,
            _ => 0,
        }
    }
}
