//! On-disk k-way merge of sorted runs
//!
//! The run merger runs as a background stage: it drains run paths from the
//! batch merger's queue (blocking in short slices so cancellation stays
//! responsive), then merges all runs into the single final lookup file with
//! a min-heap keyed by each run's next unread key. The output must be
//! strictly ascending; equal keys across runs mean the same (spot, read)
//! pair was produced twice and the merge fails rather than guessing.
//! Consumed runs are deleted immediately.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::error::MergeError;
use crate::key::Key;
use crate::lookup::entry::LookupEntry;
use crate::lookup::index::SparseIndex;
use crate::progress::CancellationToken;
use crate::Result;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// One open run with its next unread entry
struct RunCursor {
    reader: BufReader<File>,
    path: PathBuf,
    offset: usize,
    current: LookupEntry,
}

impl RunCursor {
    /// Opens a run; returns `None` for an empty run file.
    fn open(path: PathBuf) -> Result<Option<Self>> {
        let mut reader = BufReader::new(File::open(&path)?);
        let mut offset = 0;
        match LookupEntry::read_from(&mut reader, &mut offset)? {
            Some(current) => Ok(Some(Self {
                reader,
                path,
                offset,
                current,
            })),
            None => {
                std::fs::remove_file(&path)?;
                Ok(None)
            }
        }
    }

    /// Replaces the current entry with the run's next one; deletes the run
    /// file once exhausted. Verifies the run itself is sorted.
    fn advance(mut self) -> Result<(LookupEntry, Option<Self>)> {
        let consumed = match LookupEntry::read_from(&mut self.reader, &mut self.offset)? {
            Some(next) => {
                if next.key <= self.current.key {
                    return Err(MergeError::RunOutOfOrder {
                        prev: self.current.key,
                        next: next.key,
                    }
                    .into());
                }
                let consumed = std::mem::replace(&mut self.current, next);
                return Ok((consumed, Some(self)));
            }
            None => {
                std::fs::remove_file(&self.path)?;
                self.current
            }
        };
        Ok((consumed, None))
    }
}

/// Merges sorted runs into the final lookup file, sampling the sparse index
/// every `index_stride` entries.
pub struct RunMerger {
    lookup_path: PathBuf,
    index_path: PathBuf,
    index_stride: u64,
}

impl RunMerger {
    pub fn new(lookup_path: &Path, index_path: &Path, index_stride: u64) -> Self {
        Self {
            lookup_path: lookup_path.to_path_buf(),
            index_path: index_path.to_path_buf(),
            index_stride: index_stride.max(1),
        }
    }

    /// Drains the run queue until it closes, then merges everything.
    ///
    /// Returns the number of entries written.
    pub fn run(&self, run_rx: &Receiver<PathBuf>, cancel: &CancellationToken) -> Result<u64> {
        let mut runs = Vec::new();
        loop {
            cancel.check()?;
            match run_rx.recv_timeout(POLL_INTERVAL) {
                Ok(path) => runs.push(path),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.merge(runs, cancel)
    }

    /// The k-way merge proper
    pub fn merge(&self, runs: Vec<PathBuf>, cancel: &CancellationToken) -> Result<u64> {
        let mut heap: BinaryHeap<Reverse<HeapSlot>> = BinaryHeap::with_capacity(runs.len());
        for path in runs {
            if let Some(cursor) = RunCursor::open(path)? {
                heap.push(Reverse(HeapSlot(cursor)));
            }
        }

        let mut writer = BufWriter::new(File::create(&self.lookup_path)?);
        let mut index = SparseIndex::new();
        let mut written: u64 = 0;
        let mut byte_offset: u64 = 0;
        let mut last_key: Option<Key> = None;

        while let Some(Reverse(HeapSlot(cursor))) = heap.pop() {
            cancel.check()?;
            let (entry, rest) = cursor.advance()?;
            if let Some(prev) = last_key {
                if entry.key <= prev {
                    let (spot_id, read_number) = crate::key::decode(entry.key);
                    return Err(MergeError::DuplicateKey {
                        spot_id,
                        read_number,
                    }
                    .into());
                }
            }
            last_key = Some(entry.key);
            if written % self.index_stride == 0 {
                index.push(entry.key, byte_offset);
            }
            entry.write_to(&mut writer)?;
            byte_offset += entry.encoded_len() as u64;
            written += 1;
            if let Some(rest) = rest {
                heap.push(Reverse(HeapSlot(rest)));
            }
        }

        writer.flush()?;
        index.save(&self.index_path)?;
        log::info!(
            "lookup file complete: {written} entries, {} index samples",
            index.len()
        );
        Ok(written)
    }
}

/// Heap adapter ordering cursors by their next unread key
struct HeapSlot(RunCursor);

impl PartialEq for HeapSlot {
    fn eq(&self, other: &Self) -> bool {
        self.0.current.key == other.0.current.key
    }
}
impl Eq for HeapSlot {}
impl PartialOrd for HeapSlot {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapSlot {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.current.key.cmp(&other.0.current.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key;
    use std::io::BufWriter as TestBufWriter;

    fn entry(spot_id: u64, read_number: u32, bases: &[u8]) -> LookupEntry {
        let mut words = Vec::new();
        LookupEntry::pack(key::encode(spot_id, read_number), bases, &mut words).unwrap()
    }

    fn write_run(dir: &Path, name: &str, entries: &[LookupEntry]) -> PathBuf {
        let path = dir.join(name);
        let mut writer = TestBufWriter::new(File::create(&path).unwrap());
        for e in entries {
            e.write_to(&mut writer).unwrap();
        }
        writer.flush().unwrap();
        path
    }

    fn read_lookup(path: &Path) -> Vec<LookupEntry> {
        let mut reader = BufReader::new(File::open(path).unwrap());
        let mut offset = 0;
        let mut entries = Vec::new();
        while let Some(e) = LookupEntry::read_from(&mut reader, &mut offset).unwrap() {
            entries.push(e);
        }
        entries
    }

    #[test]
    fn test_merge_interleaves_runs_in_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let run_a = write_run(
            dir.path(),
            "a.lku",
            &[entry(1, 1, b"AA"), entry(3, 1, b"CC"), entry(5, 1, b"GG")],
        );
        let run_b = write_run(
            dir.path(),
            "b.lku",
            &[entry(2, 1, b"TT"), entry(3, 2, b"AC"), entry(4, 1, b"GT")],
        );
        let lookup = dir.path().join("final.lku");
        let index = dir.path().join("final.idx");
        let merger = RunMerger::new(&lookup, &index, 2);
        let written = merger
            .merge(vec![run_a.clone(), run_b.clone()], &CancellationToken::new())
            .unwrap();
        assert_eq!(written, 6);

        let keys: Vec<Key> = read_lookup(&lookup).iter().map(|e| e.key).collect();
        let mut expected = keys.clone();
        expected.sort_unstable();
        expected.dedup();
        assert_eq!(keys, expected);

        // consumed runs are deleted
        assert!(!run_a.exists());
        assert!(!run_b.exists());
        assert!(index.exists());
    }

    #[test]
    fn test_duplicate_key_across_runs_fails() {
        let dir = tempfile::tempdir().unwrap();
        let run_a = write_run(dir.path(), "a.lku", &[entry(9, 1, b"AA")]);
        let run_b = write_run(dir.path(), "b.lku", &[entry(9, 1, b"CC")]);
        let merger = RunMerger::new(
            &dir.path().join("final.lku"),
            &dir.path().join("final.idx"),
            64,
        );
        let err = merger
            .merge(vec![run_a, run_b], &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::MergeError(MergeError::DuplicateKey {
                spot_id: 9,
                read_number: 1
            })
        ));
    }

    #[test]
    fn test_out_of_order_run_fails() {
        let dir = tempfile::tempdir().unwrap();
        // hand-build an unsorted run
        let path = dir.path().join("bad.lku");
        let mut writer = TestBufWriter::new(File::create(&path).unwrap());
        entry(5, 1, b"AA").write_to(&mut writer).unwrap();
        entry(2, 1, b"CC").write_to(&mut writer).unwrap();
        writer.flush().unwrap();

        let merger = RunMerger::new(
            &dir.path().join("final.lku"),
            &dir.path().join("final.idx"),
            64,
        );
        let err = merger
            .merge(vec![path], &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::MergeError(MergeError::RunOutOfOrder { .. })
        ));
    }

    #[test]
    fn test_cancellation_stops_merge() {
        let dir = tempfile::tempdir().unwrap();
        let run = write_run(dir.path(), "a.lku", &[entry(1, 1, b"AA")]);
        let merger = RunMerger::new(
            &dir.path().join("final.lku"),
            &dir.path().join("final.idx"),
            64,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            merger.merge(vec![run], &cancel),
            Err(crate::Error::Cancelled)
        ));
    }

    #[test]
    fn test_merge_with_no_runs_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let lookup = dir.path().join("final.lku");
        let merger = RunMerger::new(&lookup, &dir.path().join("final.idx"), 64);
        let written = merger.merge(Vec::new(), &CancellationToken::new()).unwrap();
        assert_eq!(written, 0);
        assert_eq!(std::fs::metadata(&lookup).unwrap().len(), 0);
    }
}
