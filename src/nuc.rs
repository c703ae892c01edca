//! Nucleotide packing helpers
//!
//! This module wraps the `bitnuc` crate for the 2-bit encoding used by the
//! lookup wire format. `bitnuc` packs 32 bases per u64, least-significant
//! bits first (A=00, C=01, G=10, T=11); serializing the words little-endian
//! therefore yields a byte stream where byte `k` holds bases `4k..4k+4`,
//! which lets an entry store exactly `ceil(base_count / 4)` bytes.

use crate::Result;

/// Number of bytes needed to hold `base_count` packed bases
#[must_use]
pub fn packed_size(base_count: usize) -> usize {
    base_count.div_ceil(4)
}

/// Packs an ASCII sequence into 2-bit bytes.
///
/// `words` is a reusable scratch buffer; `out` is cleared and filled with the
/// packed representation. Fails on bases outside A, C, G, T (ambiguous bases
/// are masked upstream by the storage engine and never reach this point).
pub fn pack(bases: &[u8], words: &mut Vec<u64>, out: &mut Vec<u8>) -> Result<()> {
    words.clear();
    out.clear();
    bitnuc::encode(bases, words)?;
    let n_bytes = packed_size(bases.len());
    out.reserve(n_bytes);
    for word in words.iter() {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.truncate(n_bytes);
    Ok(())
}

/// Unpacks `base_count` bases from a 2-bit byte buffer into ASCII.
///
/// `words` is a reusable scratch buffer; decoded bases are appended to `out`.
pub fn unpack(packed: &[u8], base_count: usize, words: &mut Vec<u64>, out: &mut Vec<u8>) -> Result<()> {
    words.clear();
    words.resize(base_count.div_ceil(32), 0);
    let word_bytes: usize = 8;
    for (i, chunk) in packed.chunks(word_bytes).enumerate() {
        let mut buf = [0u8; 8];
        buf[..chunk.len()].copy_from_slice(chunk);
        words[i] = u64::from_le_bytes(buf);
    }
    bitnuc::decode(words, base_count, out)?;
    Ok(())
}

/// Reverse-complements an ASCII sequence in place
pub fn revcomp_in_place(bases: &mut [u8]) {
    bases.reverse();
    for b in bases.iter_mut() {
        *b = match *b {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            other => other,
        };
    }
}
