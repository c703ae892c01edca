//! The join phase
//!
//! A [`JoinEngine`] reconstructs output records for one worker's row range.
//! Per spot it classifies each read as aligned or unaligned, pulls bases
//! from the inline row data or the lookup file accordingly, applies the
//! configured filters and routes the result through the printer. Per-row
//! data defects (length mismatches) are counted and logged, never fatal;
//! lookup and I/O failures propagate and cancel the run.

pub mod printer;
pub mod registry;

use crate::error::JoinError;
use crate::filter::{read_passes, spot_passes, BaseFilter};
use crate::format::{FormatKind, Layout};
use crate::join::printer::{FlexPrinter, RecordParts};
use crate::lookup::reader::LookupReader;
use crate::options::JoinOptions;
use crate::source::SpotRecord;
use crate::stats::JoinStats;
use crate::Result;

pub struct JoinEngine {
    format: FormatKind,
    layout: Layout,
    options: JoinOptions,
    filter: Option<BaseFilter>,
    lookup: LookupReader,
    printer: FlexPrinter,
    pub stats: JoinStats,
    fetched1: Vec<u8>,
    fetched2: Vec<u8>,
}

impl JoinEngine {
    pub fn new(
        format: FormatKind,
        layout: Layout,
        options: &JoinOptions,
        filter: Option<BaseFilter>,
        lookup: LookupReader,
        printer: FlexPrinter,
    ) -> Self {
        Self {
            format,
            layout,
            options: options.localized(layout),
            filter,
            lookup,
            printer,
            stats: JoinStats::new(),
            fetched1: Vec::new(),
            fetched2: Vec::new(),
        }
    }

    /// Processes one spot. `Err` values are fatal to the worker; data
    /// defects are absorbed into [`JoinStats`].
    pub fn process(&mut self, rec: &SpotRecord) -> Result<()> {
        match rec.num_reads() {
            1 => self.process_single(rec),
            2 => self.process_pair(rec),
            num_reads => Err(JoinError::UnsupportedReadCount {
                row_id: rec.row_id,
                num_reads,
            }
            .into()),
        }
    }

    /// Hands back the final counters, flushing the worker's part files
    pub fn finish(self) -> Result<JoinStats> {
        self.printer.finish()?;
        Ok(self.stats)
    }

    /// Technical and minimum-length pre-filter for read `idx`
    fn pre_filter(&mut self, rec: &SpotRecord, idx: usize) -> bool {
        if self.options.skip_technical && !rec.is_biological(idx) {
            self.stats.reads_technical += 1;
            return false;
        }
        if self.options.min_read_length > 0
            && rec.read_lengths[idx] < self.options.min_read_length
        {
            self.stats.reads_too_short += 1;
            return false;
        }
        true
    }

    fn invalid_row(&mut self, rec: &SpotRecord, detail: &str) {
        log::warn!("row #{}: {detail}", rec.row_id);
        self.stats.reads_invalid += 1;
    }

    fn name_of<'r>(options: &JoinOptions, rec: &'r SpotRecord) -> Option<&'r [u8]> {
        if options.name_as_rowid {
            None
        } else {
            Some(rec.name.as_slice())
        }
    }

    fn group_of<'r>(options: &JoinOptions, rec: &'r SpotRecord) -> Option<&'r [u8]> {
        if options.emit_spot_group {
            Some(rec.spot_group.as_slice())
        } else {
            None
        }
    }

    fn process_single(&mut self, rec: &SpotRecord) -> Result<()> {
        self.stats.spots_read += 1;
        self.stats.reads_read += 1;
        if !self.pre_filter(rec, 0) {
            return Ok(());
        }
        if rec.is_aligned(0) {
            self.lookup
                .fetch(rec.row_id as u64, 1, rec.is_reverse(0), &mut self.fetched1)?;
        }
        let bases: &[u8] = if rec.is_aligned(0) {
            &self.fetched1
        } else {
            &rec.inline_bases
        };
        if self.format.has_quality() && bases.len() != rec.quality.len() {
            let detail = format!(
                "read.len({}) != quality.len({})",
                bases.len(),
                rec.quality.len()
            );
            self.invalid_row(rec, &detail);
            return Ok(());
        }
        if bases.is_empty() {
            self.stats.reads_zero_length += 1;
            return Ok(());
        }
        if !read_passes(self.filter.as_ref(), bases) {
            return Ok(());
        }
        self.printer.print(&RecordParts {
            row_id: rec.row_id,
            read_id: 1,
            dst_id: self.layout.dest_for_single(),
            name: Self::name_of(&self.options, rec),
            spot_group: Self::group_of(&self.options, rec),
            read1: bases,
            read2: None,
            quality: self.format.has_quality().then_some(&rec.quality),
        })?;
        self.stats.reads_written += 1;
        Ok(())
    }

    fn process_pair(&mut self, rec: &SpotRecord) -> Result<()> {
        self.stats.spots_read += 1;
        self.stats.reads_read += 2;
        match self.layout {
            Layout::WholeSpot => self.pair_whole_spot(rec),
            Layout::SplitSpot | Layout::SplitFile | Layout::Split3 => self.pair_split(rec),
        }
    }

    /// One combined record per spot; no per-read filtering
    fn pair_whole_spot(&mut self, rec: &SpotRecord) -> Result<()> {
        let r1_len = rec.read_len(0);
        let spot_len = rec.spot_len();
        // the inline buffer normally holds only the unaligned reads; when
        // it spans the whole spot it contains both halves and only the
        // unaligned read's slice of it applies
        let whole_inline = if self.format.has_quality() {
            rec.inline_bases.len() == rec.quality.len()
        } else {
            rec.inline_bases.len() == spot_len
        };

        let (read1, read2): (&[u8], Option<&[u8]>) =
            match (rec.is_aligned(0), rec.is_aligned(1)) {
                (false, false) => (&rec.inline_bases, None),
                (false, true) => {
                    self.lookup
                        .fetch(rec.row_id as u64, 2, rec.is_reverse(1), &mut self.fetched2)?;
                    let inline: &[u8] = if whole_inline && rec.inline_bases.len() >= r1_len {
                        &rec.inline_bases[..r1_len]
                    } else {
                        &rec.inline_bases
                    };
                    (inline, Some(&self.fetched2))
                }
                (true, false) => {
                    self.lookup
                        .fetch(rec.row_id as u64, 1, rec.is_reverse(0), &mut self.fetched1)?;
                    let inline: &[u8] = if whole_inline && rec.inline_bases.len() >= r1_len {
                        &rec.inline_bases[r1_len..]
                    } else {
                        &rec.inline_bases
                    };
                    (&self.fetched1, Some(inline))
                }
                (true, true) => {
                    self.lookup
                        .fetch(rec.row_id as u64, 1, rec.is_reverse(0), &mut self.fetched1)?;
                    self.lookup
                        .fetch(rec.row_id as u64, 2, rec.is_reverse(1), &mut self.fetched2)?;
                    (&self.fetched1, Some(&self.fetched2))
                }
            };

        // filtered spots are dropped before any validation; they never
        // count as invalid
        let passes = match read2 {
            Some(read2) => spot_passes(self.filter.as_ref(), read1, read2),
            None => read_passes(self.filter.as_ref(), read1),
        };
        if !passes {
            return Ok(());
        }

        let combined_len = read1.len() + read2.map_or(0, <[u8]>::len);
        if self.format.has_quality() && combined_len != rec.quality.len() {
            let detail = format!(
                "read.len({combined_len}) != quality.len({})",
                rec.quality.len()
            );
            log::warn!("row #{}: {detail}", rec.row_id);
            self.stats.reads_invalid += 1;
            return Ok(());
        }

        self.printer.print(&RecordParts {
            row_id: rec.row_id,
            read_id: 1,
            dst_id: 0,
            name: Self::name_of(&self.options, rec),
            spot_group: Self::group_of(&self.options, rec),
            read1,
            read2,
            quality: self.format.has_quality().then_some(&rec.quality),
        })?;
        self.stats.reads_written += 2;
        Ok(())
    }

    /// One record per surviving read, routed by the layout's destination
    /// table
    fn pair_split(&mut self, rec: &SpotRecord) -> Result<()> {
        let r1_len = rec.read_len(0);
        let r2_len = rec.read_len(1);
        let spot_len = r1_len + r2_len;

        let mut process_0 = self.pre_filter(rec, 0);
        let mut process_1 = self.pre_filter(rec, 1);
        if !process_0 && !process_1 {
            return Ok(());
        }

        let with_quality = self.format.has_quality();
        if with_quality && rec.quality.len() != spot_len {
            let detail = format!(
                "Q[1].len({r1_len}) + Q[2].len({r2_len}) != Q.len({})",
                rec.quality.len()
            );
            self.invalid_row(rec, &detail);
            return Ok(());
        }
        let (q1, q2): (&[u8], &[u8]) = if with_quality {
            (&rec.quality[..r1_len], &rec.quality[r1_len..spot_len])
        } else {
            (&[], &[])
        };

        // the inline buffer spans the whole spot for fully unaligned rows,
        // and sometimes for half-aligned ones (both halves present)
        let whole_inline = rec.inline_bases.len() == spot_len;
        let aligned = (rec.is_aligned(0), rec.is_aligned(1));
        if aligned == (false, false) && !whole_inline {
            let detail = format!(
                "read.len({}) != spot_len({spot_len})",
                rec.inline_bases.len()
            );
            self.invalid_row(rec, &detail);
            return Ok(());
        }
        if process_0 && aligned.0 {
            self.lookup
                .fetch(rec.row_id as u64, 1, rec.is_reverse(0), &mut self.fetched1)?;
        }
        if process_1 && aligned.1 {
            self.lookup
                .fetch(rec.row_id as u64, 2, rec.is_reverse(1), &mut self.fetched2)?;
        }

        let read1: &[u8] = match aligned {
            (true, _) => &self.fetched1,
            (false, _) if whole_inline => &rec.inline_bases[..r1_len],
            (false, _) => &rec.inline_bases,
        };
        let read2: &[u8] = match aligned {
            (_, true) => &self.fetched2,
            (_, false) if whole_inline => &rec.inline_bases[r1_len..spot_len],
            (_, false) => &rec.inline_bases,
        };

        if with_quality {
            if process_0 && read1.len() != q1.len() {
                let detail = format!("R[1].len({}) != Q[1].len({})", read1.len(), q1.len());
                self.invalid_row(rec, &detail);
                return Ok(());
            }
            if process_1 && read2.len() != q2.len() {
                let detail = format!("R[2].len({}) != Q[2].len({})", read2.len(), q2.len());
                self.invalid_row(rec, &detail);
                return Ok(());
            }
        }

        if process_0 && read1.is_empty() {
            self.stats.reads_zero_length += 1;
            process_0 = false;
        }
        if process_1 && read2.is_empty() {
            self.stats.reads_zero_length += 1;
            process_1 = false;
        }
        process_0 = process_0 && read_passes(self.filter.as_ref(), read1);
        process_1 = process_1 && read_passes(self.filter.as_ref(), read2);

        let name = Self::name_of(&self.options, rec);
        let spot_group = Self::group_of(&self.options, rec);
        if process_0 {
            self.printer.print(&RecordParts {
                row_id: rec.row_id,
                read_id: 1,
                dst_id: self.layout.dest_for_pair(1, process_1),
                name,
                spot_group,
                read1,
                read2: None,
                quality: with_quality.then_some(q1),
            })?;
            self.stats.reads_written += 1;
        }
        if process_1 {
            self.printer.print(&RecordParts {
                row_id: rec.row_id,
                read_id: 2,
                dst_id: self.layout.dest_for_pair(2, process_0),
                name,
                spot_group,
                read1: read2,
                read2: None,
                quality: with_quality.then_some(q2),
            })?;
            self.stats.reads_written += 1;
        }
        Ok(())
    }
}
