//! In-memory batch merge with spill-to-disk
//!
//! The batch merger absorbs unordered entry batches from all producer
//! threads into one key-sorted map. Whenever the accumulated memory passes
//! the configured ceiling it writes the map out as a sorted run file and
//! hands the path to the run merger's queue. At most one entry may exist
//! per key; a second entry for the same key is a data defect and is
//! surfaced, never dropped.

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;

use crate::error::MergeError;
use crate::key::Key;
use crate::lookup::entry::LookupEntry;
use crate::Result;

/// Default in-memory ceiling before a spill (bytes)
pub const DEFAULT_MEM_LIMIT: usize = 512 * 1024 * 1024;

pub struct BatchMerger {
    entries: BTreeMap<Key, LookupEntry>,
    mem_used: usize,
    mem_limit: usize,
    temp_dir: PathBuf,
    runs_written: usize,
    run_tx: Sender<PathBuf>,
}

impl BatchMerger {
    pub fn new(temp_dir: &Path, mem_limit: usize, run_tx: Sender<PathBuf>) -> Self {
        Self {
            entries: BTreeMap::new(),
            mem_used: 0,
            mem_limit: mem_limit.max(1),
            temp_dir: temp_dir.to_path_buf(),
            runs_written: 0,
            run_tx,
        }
    }

    /// Absorbs one producer batch, spilling if the ceiling is reached
    pub fn absorb(&mut self, batch: Vec<LookupEntry>) -> Result<()> {
        for entry in batch {
            self.mem_used += entry.mem_size();
            if let Some(previous) = self.entries.insert(entry.key, entry) {
                let (spot_id, read_number) = crate::key::decode(previous.key);
                return Err(MergeError::DuplicateKey {
                    spot_id,
                    read_number,
                }
                .into());
            }
        }
        if self.mem_used >= self.mem_limit {
            self.spill()?;
        }
        Ok(())
    }

    /// Number of entries currently held in memory
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Writes the accumulated entries as one sorted run and queues its path
    fn spill(&mut self) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        let path = self.temp_dir.join(format!("run-{:04}.lku", self.runs_written));
        let mut writer = BufWriter::new(std::fs::File::create(&path)?);
        for entry in self.entries.values() {
            entry.write_to(&mut writer)?;
        }
        writer.flush()?;
        log::info!(
            "spilled run {} with {} entries",
            self.runs_written,
            self.entries.len()
        );
        self.entries.clear();
        self.mem_used = 0;
        self.runs_written += 1;
        self.run_tx
            .send(path)
            .map_err(|_| MergeError::QueueDisconnected)?;
        Ok(())
    }

    /// Flushes any remainder as a final run. Consumes the merger; dropping
    /// it afterwards closes the run queue, which tells the run merger that
    /// no more runs will arrive.
    pub fn finish(mut self) -> Result<usize> {
        self.spill()?;
        Ok(self.runs_written)
    }
}
