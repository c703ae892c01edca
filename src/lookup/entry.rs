//! Lookup wire format
//!
//! A lookup file is a contiguous sequence of variable-length entries:
//!
//! ```text
//! [key: 8 bytes LE] [base_count: LEB128 varint] [packed bases: ceil(n/4) bytes]
//! ```
//!
//! Sorted runs produced by the batch merger use the identical layout, so one
//! codec serves the spill files, the k-way merge and the final file.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::LookupError;
use crate::key::Key;
use crate::{nuc, Result};

/// Widest legal base-count varint (u32, 7 bits per byte)
const MAX_VARINT_LEN: usize = 5;

fn write_varint<W: Write>(writer: &mut W, mut value: u32) -> Result<()> {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        writer.write_all(&[byte])?;
        if value == 0 {
            return Ok(());
        }
    }
}

fn read_varint<R: Read>(reader: &mut R, offset: usize) -> Result<(u32, usize)> {
    let mut value = 0u32;
    let mut consumed = 0;
    loop {
        let byte = reader.read_u8().map_err(|e| truncation(e, offset))?;
        value |= u32::from(byte & 0x7f) << (7 * consumed);
        consumed += 1;
        if byte & 0x80 == 0 {
            return Ok((value, consumed));
        }
        if consumed == MAX_VARINT_LEN {
            return Err(LookupError::MalformedBaseCount(offset).into());
        }
    }
}

fn truncation(err: std::io::Error, offset: usize) -> crate::Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        LookupError::Truncated(offset).into()
    } else {
        err.into()
    }
}

/// One decoded lookup entry, owning its packed bases
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupEntry {
    pub key: Key,
    pub base_count: u32,
    pub packed: Vec<u8>,
}

impl LookupEntry {
    /// Packs an ASCII sequence into a new entry. `words` is reusable scratch.
    pub fn pack(key: Key, bases: &[u8], words: &mut Vec<u64>) -> Result<Self> {
        let mut packed = Vec::new();
        nuc::pack(bases, words, &mut packed)?;
        Ok(Self {
            key,
            base_count: bases.len() as u32,
            packed,
        })
    }

    /// Size of this entry on the wire
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let mut varint_len = 1;
        let mut v = self.base_count >> 7;
        while v != 0 {
            varint_len += 1;
            v >>= 7;
        }
        8 + varint_len + self.packed.len()
    }

    /// Approximate in-memory footprint, used for the batch-merge ceiling
    #[must_use]
    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.packed.capacity()
    }

    /// Serializes the entry
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<LittleEndian>(self.key)?;
        write_varint(writer, self.base_count)?;
        writer.write_all(&self.packed)?;
        Ok(())
    }

    /// Deserializes the next entry, or `None` at a clean end of stream.
    ///
    /// `offset` is the stream position of the entry, used for error
    /// reporting; on success it is advanced past the entry.
    pub fn read_from<R: Read>(reader: &mut R, offset: &mut usize) -> Result<Option<Self>> {
        let mut key_buf = [0u8; 8];
        match reader.read(&mut key_buf)? {
            0 => return Ok(None),
            8 => {}
            n => {
                let mut filled = n;
                while filled < 8 {
                    let more = reader.read(&mut key_buf[filled..])?;
                    if more == 0 {
                        return Err(LookupError::Truncated(*offset).into());
                    }
                    filled += more;
                }
            }
        }
        let key = u64::from_le_bytes(key_buf);
        let (base_count, varint_len) = read_varint(reader, *offset)?;
        let mut packed = vec![0u8; nuc::packed_size(base_count as usize)];
        reader
            .read_exact(&mut packed)
            .map_err(|e| truncation(e, *offset))?;
        *offset += 8 + varint_len + packed.len();
        Ok(Some(Self {
            key,
            base_count,
            packed,
        }))
    }
}

/// A lookup entry decoded in place from a byte buffer (the mmapped file)
#[derive(Debug)]
pub struct EntryRef<'a> {
    pub key: Key,
    pub base_count: u32,
    pub packed: &'a [u8],
    /// Offset of the entry that follows this one
    pub next_offset: usize,
}

/// Decodes the entry starting at `offset` within `buf`
pub fn decode_at(buf: &[u8], offset: usize) -> Result<EntryRef<'_>> {
    let mut cursor = &buf[offset.min(buf.len())..];
    if cursor.len() < 8 {
        return Err(LookupError::Truncated(offset).into());
    }
    let key = u64::from_le_bytes(cursor[..8].try_into().unwrap());
    cursor = &cursor[8..];
    let mut slice = cursor;
    let (base_count, varint_len) = read_varint(&mut slice, offset)?;
    let packed_len = nuc::packed_size(base_count as usize);
    let body_start = 8 + varint_len;
    if cursor.len() < varint_len + packed_len {
        return Err(LookupError::Truncated(offset).into());
    }
    let packed = &cursor[varint_len..varint_len + packed_len];
    Ok(EntryRef {
        key,
        base_count,
        packed,
        next_offset: offset + body_start + packed_len,
    })
}
