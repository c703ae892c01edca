mod error;
mod filter;
mod format;
mod options;
mod progress;
mod source;
mod stats;

pub mod join;
pub mod key;
pub mod lookup;
pub mod nuc;
pub mod pipeline;

pub use error::{ConfigError, Error, JoinError, LookupError, MergeError, Result};
pub use filter::BaseFilter;
pub use format::{FormatKind, Layout};
pub use join::printer::{default_header_builder, FlexPrinter, HeaderBuilder, HeaderContext};
pub use join::registry::{OutputDest, TempPartRegistry};
pub use join::JoinEngine;
pub use key::Key;
pub use lookup::reader::{LookupFile, LookupReader};
pub use options::JoinOptions;
pub use pipeline::{
    build_lookup, execute_join, extract, rows_per_thread, verify_lookup, JoinConfig, LookupConfig,
};
pub use progress::{CancellationToken, ProgressTracker};
pub use source::{
    AlignmentRow, AlignmentSource, FieldSelection, SequenceSource, SpotRecord,
    READ_TYPE_BIOLOGICAL, READ_TYPE_FORWARD, READ_TYPE_REVERSE,
};
pub use stats::JoinStats;
