//! Record serialization
//!
//! The printer turns one logical record (1-2 read slices, optional quality)
//! into FASTQ or FASTA text and appends it to the worker's part file for
//! the record's destination stream. Header lines are produced by a
//! caller-replaceable callback; the default renders
//! `{accession}.{row_id} {name-or-row-id} [spot-group] length={len}`.

use std::sync::Arc;

use crate::format::FormatKind;
use crate::join::registry::PartWriters;
use crate::Result;

/// Everything a header builder may want to render
pub struct HeaderContext<'a> {
    pub accession: &'a str,
    pub row_id: i64,
    pub read_id: u32,
    /// Spot name; `None` when row-id naming is in effect
    pub name: Option<&'a [u8]>,
    /// Spot group; `None` when suppressed or empty
    pub spot_group: Option<&'a [u8]>,
    /// Total base count of the record
    pub length: usize,
}

/// Renders a header line (without the leading `@`/`>`) into `out`
pub type HeaderBuilder = Arc<dyn Fn(&HeaderContext<'_>, &mut Vec<u8>) + Send + Sync>;

/// The stock header format
#[must_use]
pub fn default_header_builder() -> HeaderBuilder {
    Arc::new(|ctx, out| {
        let mut itoa_buf = itoa::Buffer::new();
        out.extend_from_slice(ctx.accession.as_bytes());
        out.push(b'.');
        out.extend_from_slice(itoa_buf.format(ctx.row_id).as_bytes());
        out.push(b' ');
        match ctx.name {
            Some(name) if !name.is_empty() => out.extend_from_slice(name),
            _ => out.extend_from_slice(itoa_buf.format(ctx.row_id).as_bytes()),
        }
        if let Some(group) = ctx.spot_group {
            if !group.is_empty() {
                out.push(b' ');
                out.extend_from_slice(group);
            }
        }
        out.extend_from_slice(b" length=");
        out.extend_from_slice(itoa_buf.format(ctx.length).as_bytes());
    })
}

/// One logical record ready for serialization
pub struct RecordParts<'a> {
    pub row_id: i64,
    pub read_id: u32,
    pub dst_id: u32,
    pub name: Option<&'a [u8]>,
    pub spot_group: Option<&'a [u8]>,
    pub read1: &'a [u8],
    /// Second read of a whole-spot record; concatenated after `read1`
    pub read2: Option<&'a [u8]>,
    /// Quality for the whole record; present exactly on FASTQ paths
    pub quality: Option<&'a [u8]>,
}

/// Per-worker record formatter writing into that worker's part files
pub struct FlexPrinter {
    format: FormatKind,
    accession: String,
    header: HeaderBuilder,
    parts: PartWriters,
    line: Vec<u8>,
}

impl FlexPrinter {
    pub fn new(
        format: FormatKind,
        accession: &str,
        header: HeaderBuilder,
        parts: PartWriters,
    ) -> Self {
        Self {
            format,
            accession: accession.to_string(),
            header,
            parts,
            line: Vec::with_capacity(1024),
        }
    }

    /// Serializes one record and appends it to its destination part
    pub fn print(&mut self, data: &RecordParts<'_>) -> Result<()> {
        let length = data.read1.len() + data.read2.map_or(0, <[u8]>::len);
        let ctx = HeaderContext {
            accession: &self.accession,
            row_id: data.row_id,
            read_id: data.read_id,
            name: data.name,
            spot_group: data.spot_group,
            length,
        };
        self.line.clear();
        self.line.push(match self.format {
            FormatKind::Fastq => b'@',
            FormatKind::Fasta => b'>',
        });
        (self.header)(&ctx, &mut self.line);
        self.line.push(b'\n');
        self.line.extend_from_slice(data.read1);
        if let Some(read2) = data.read2 {
            self.line.extend_from_slice(read2);
        }
        self.line.push(b'\n');
        if self.format == FormatKind::Fastq {
            if let Some(quality) = data.quality {
                self.line.extend_from_slice(b"+\n");
                self.line.extend_from_slice(quality);
                self.line.push(b'\n');
            }
        }
        self.parts.write(data.dst_id, &self.line)
    }

    /// Flushes and closes the worker's part files
    pub fn finish(self) -> Result<()> {
        self.parts.finish()
    }
}
