//! Join run options
//!
//! A [`JoinOptions`] bundle is derived once before any worker starts and is
//! immutable for the duration of a run. Two corrections happen between the
//! caller's raw options and what the workers see: row-id naming is forced
//! when the source has no name column, and whole-spot joins never skip
//! technical reads (the spot is emitted as one record, so dropping a read
//! would break the length accounting).

use crate::format::Layout;

/// Options controlling filtering and header rendering during the join phase
#[derive(Clone, Debug)]
pub struct JoinOptions {
    /// Exclude technical (non-biological) reads from the output
    pub skip_technical: bool,
    /// Exclude reads shorter than this many bases (0 disables the filter)
    pub min_read_length: u32,
    /// Emit a spot only if one of its reads contains this subsequence
    pub base_filter_pattern: Option<String>,
    /// Use the row id instead of the stored spot name in headers
    pub name_as_rowid: bool,
    /// Append the spot group to headers when present
    pub emit_spot_group: bool,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            skip_technical: true,
            min_read_length: 0,
            base_filter_pattern: None,
            name_as_rowid: false,
            emit_spot_group: false,
        }
    }
}

impl JoinOptions {
    /// Applies the column-presence correction: without a NAME column the
    /// only possible spot name is the row id.
    #[must_use]
    pub fn corrected(mut self, name_column_present: bool) -> Self {
        if !name_column_present {
            self.name_as_rowid = true;
        }
        self
    }

    /// Applies the per-layout correction. Whole-spot output keeps technical
    /// reads regardless of `skip_technical`.
    #[must_use]
    pub fn localized(&self, layout: Layout) -> Self {
        let mut local = self.clone();
        if layout == Layout::WholeSpot {
            local.skip_technical = false;
        }
        local
    }
}
