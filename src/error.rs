/// Custom Result type for spotjoin operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the spotjoin library, encompassing all error cases
/// that can occur while building or consuming a lookup file and joining it
/// against a sequence source.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors raised while reading the lookup file or its sparse index
    #[error("Error in lookup: {0}")]
    LookupError(#[from] LookupError),

    /// Errors raised by the batch/run merge stages
    #[error("Error while merging: {0}")]
    MergeError(#[from] MergeError),

    /// Errors raised by the join phase
    #[error("Error while joining: {0}")]
    JoinError(#[from] JoinError),

    /// Errors detected before any worker threads start
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// Errors from the bitnuc dependency for nucleotide encoding/decoding
    #[error("Bitnuc error: {0}")]
    BitnucError(#[from] bitnuc::NucleotideError),

    /// Cooperative cancellation observed (user interrupt or sibling failure)
    #[error("Operation cancelled")]
    Cancelled,
}

/// Errors specific to the lookup file, its wire format and its sparse index
#[derive(thiserror::Error, Debug)]
pub enum LookupError {
    /// A key that must exist (the sequence row claims the read is aligned)
    /// was not found in the lookup file. This is a data-consistency defect,
    /// not a normal miss.
    #[error("No lookup entry for spot {spot_id} read {read_number}")]
    KeyNotFound { spot_id: u64, read_number: u32 },

    /// A lookup entry holds different bases than the alignment row it was
    /// built from (verification pass)
    #[error("Lookup bases differ from source for spot {spot_id} read {read_number}")]
    BaseMismatch { spot_id: u64, read_number: u32 },

    /// The lookup file ended in the middle of an entry
    #[error("Lookup file truncated at byte offset {0}")]
    Truncated(usize),

    /// A varint base-count field did not terminate within its maximum width
    #[error("Malformed base count at byte offset {0}")]
    MalformedBaseCount(usize),

    /// The index file size is not a multiple of the entry size
    #[error("Unable to cast bytes to sparse index - likely a truncated index file")]
    IndexCastingError,

    /// An index sample points past the end of the lookup file
    ///
    /// The first parameter is the sample offset, the second the file size.
    #[error("Index sample offset {0} exceeds lookup file size {1}")]
    IndexOutOfBounds(u64, u64),
}

/// Errors raised by the in-memory batch merge and the on-disk k-way merge
#[derive(thiserror::Error, Debug)]
pub enum MergeError {
    /// Two lookup entries carried the same key. At most one entry may exist
    /// per (spot, read) pair; duplicates are surfaced, never dropped.
    #[error("Duplicate lookup key for spot {spot_id} read {read_number}")]
    DuplicateKey { spot_id: u64, read_number: u32 },

    /// A sorted run produced keys out of order
    #[error("Sorted run out of order: key {next:#x} follows {prev:#x}")]
    RunOutOfOrder { prev: u64, next: u64 },

    /// The merge stage's input queue disconnected before the end-of-input
    /// marker arrived
    #[error("Merge input queue disconnected unexpectedly")]
    QueueDisconnected,
}

/// Errors raised by the join phase (fatal ones - per-row data errors are
/// counted in [`crate::JoinStats`] instead)
#[derive(thiserror::Error, Debug)]
pub enum JoinError {
    /// A spot carried an unsupported number of reads
    #[error("Spot {row_id} has {num_reads} reads - expected 1 or 2")]
    UnsupportedReadCount { row_id: i64, num_reads: usize },

    /// A record was routed to a destination the printer was not built for
    #[error("No output destination with id {0}")]
    UnknownDestination(u32),

    /// A worker thread panicked
    #[error("Worker thread {0} panicked")]
    WorkerPanic(usize),
}

/// Errors detected during setup, before any worker threads start
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The output file exists and neither force nor append was requested
    #[error("Output file already exists: {0}")]
    OutputExists(String),

    /// The base filter pattern contains characters outside A, C, G, T
    #[error("Invalid base filter pattern: {0}")]
    InvalidFilterPattern(String),

    /// A source reported zero rows where at least one was required
    #[error("Source is empty: {0}")]
    EmptySource(&'static str),
}
