//! Base-content filter
//!
//! An optional filter that admits only spots containing a given subsequence.
//! The pattern and the reads are compared over their 2-bit codes, so bases
//! outside A, C, G, T in a read never match a pattern position. A read/spot
//! that fails the filter is simply not emitted; it is not an error and not
//! counted as invalid.

use crate::error::ConfigError;
use crate::Result;

fn code_of(base: u8) -> Option<u8> {
    match base {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// A compiled base-content filter
#[derive(Clone, Debug)]
pub struct BaseFilter {
    pattern: Vec<u8>,
}

impl BaseFilter {
    /// Compiles a pattern. Fails on characters outside A, C, G, T.
    pub fn new(pattern: &str) -> Result<Self> {
        let mut codes = Vec::with_capacity(pattern.len());
        for b in pattern.bytes() {
            match code_of(b) {
                Some(code) => codes.push(code),
                None => {
                    return Err(ConfigError::InvalidFilterPattern(pattern.to_string()).into());
                }
            }
        }
        if codes.is_empty() {
            return Err(ConfigError::InvalidFilterPattern(pattern.to_string()).into());
        }
        Ok(Self { pattern: codes })
    }

    /// Compiles an optional pattern; `None` means no filtering.
    pub fn from_option(pattern: Option<&str>) -> Result<Option<Self>> {
        pattern.map(Self::new).transpose()
    }

    /// True if `bases` contains the pattern as a contiguous subsequence
    #[must_use]
    pub fn matches(&self, bases: &[u8]) -> bool {
        let n = self.pattern.len();
        if bases.len() < n {
            return false;
        }
        'windows: for window in bases.windows(n) {
            for (b, &p) in window.iter().zip(&self.pattern) {
                if code_of(*b) != Some(p) {
                    continue 'windows;
                }
            }
            return true;
        }
        false
    }

    /// True if either read of a spot matches
    #[must_use]
    pub fn matches_either(&self, read1: &[u8], read2: &[u8]) -> bool {
        self.matches(read1) || self.matches(read2)
    }
}

/// Applies an optional filter to a single read; no filter admits everything.
#[must_use]
pub fn read_passes(filter: Option<&BaseFilter>, bases: &[u8]) -> bool {
    filter.is_none_or(|f| f.matches(bases))
}

/// Applies an optional filter to a whole spot: the spot passes if either
/// read matches.
#[must_use]
pub fn spot_passes(filter: Option<&BaseFilter>, read1: &[u8], read2: &[u8]) -> bool {
    filter.is_none_or(|f| f.matches_either(read1, read2))
}
