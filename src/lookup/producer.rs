//! Keyed entry production from the alignment source
//!
//! Each producer owns a contiguous row range of the alignment table. It
//! packs every row into a [`LookupEntry`] and hands entries to the batch
//! merger in fixed-size batches through a bounded queue. A full queue makes
//! the producer block in short slices, polling the cancellation token, so
//! backpressure never turns into an unresponsive thread.

use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender};

use crate::error::MergeError;
use crate::lookup::entry::LookupEntry;
use crate::progress::{CancellationToken, ProgressTracker};
use crate::source::AlignmentSource;
use crate::{key, Result};

/// Entries per batch handed to the merge queue
pub const DEFAULT_BATCH_SIZE: usize = 4096;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct LookupProducer<'a> {
    source: &'a dyn AlignmentSource,
    batch_tx: Sender<Vec<LookupEntry>>,
    batch_size: usize,
    cancel: CancellationToken,
    progress: ProgressTracker,
}

impl<'a> LookupProducer<'a> {
    pub fn new(
        source: &'a dyn AlignmentSource,
        batch_tx: Sender<Vec<LookupEntry>>,
        batch_size: usize,
        cancel: CancellationToken,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            source,
            batch_tx,
            batch_size: batch_size.max(1),
            cancel,
            progress,
        }
    }

    /// Processes one contiguous row range, flushing the final partial batch
    pub fn produce_range(&self, first_row: i64, count: u64) -> Result<()> {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut words = Vec::new();
        for row in self.source.open_range(first_row, count)? {
            self.cancel.check()?;
            let row = row?;
            let entry_key = key::encode(row.spot_id, row.read_number);
            batch.push(LookupEntry::pack(entry_key, &row.bases, &mut words)?);
            self.progress.add(1);
            if batch.len() >= self.batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                self.send_batch(full)?;
            }
        }
        if !batch.is_empty() {
            self.send_batch(batch)?;
        }
        Ok(())
    }

    fn send_batch(&self, mut batch: Vec<LookupEntry>) -> Result<()> {
        loop {
            self.cancel.check()?;
            match self.batch_tx.send_timeout(batch, POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => batch = returned,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(MergeError::QueueDisconnected.into());
                }
            }
        }
    }
}
