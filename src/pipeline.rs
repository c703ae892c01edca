//! Run orchestration
//!
//! Two phases share one thread-count setting. The lookup-construction phase
//! pipelines producers, the in-memory batch merger and the on-disk run
//! merger over bounded queues; it ends with the final lookup file and its
//! index durable on disk. The join phase then splits the sequence table
//! into contiguous row ranges, one worker per range, and concatenates the
//! workers' part files when every worker has been joined. Errors from
//! workers are collected, not raced: the first real failure cancels the
//! siblings and is the one reported.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;

use crate::error::{JoinError, LookupError};
use crate::filter::BaseFilter;
use crate::format::{FormatKind, Layout};
use crate::join::printer::{default_header_builder, FlexPrinter, HeaderBuilder};
use crate::join::registry::{OutputDest, TempPartRegistry};
use crate::join::JoinEngine;
use crate::lookup::batch::{BatchMerger, DEFAULT_MEM_LIMIT};
use crate::lookup::index::DEFAULT_INDEX_STRIDE;
use crate::lookup::merge::RunMerger;
use crate::lookup::producer::{LookupProducer, DEFAULT_BATCH_SIZE};
use crate::lookup::reader::LookupFile;
use crate::options::JoinOptions;
use crate::progress::{CancellationToken, ProgressTracker};
use crate::source::{AlignmentSource, FieldSelection, SequenceSource};
use crate::stats::JoinStats;
use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Minimum rows per requested thread before multithreading pays off
const ROWS_PER_THREAD_FLOOR: u64 = 100;

/// Splits `row_count` over up to `requested_threads` workers.
///
/// Small tables collapse to a single worker; otherwise every worker gets
/// `row_count / threads + 1` rows so the ranges cover the table.
#[must_use]
pub fn rows_per_thread(row_count: u64, requested_threads: usize) -> (usize, u64) {
    let requested = requested_threads.max(1) as u64;
    if row_count < ROWS_PER_THREAD_FLOOR * requested {
        (1, row_count)
    } else {
        (requested as usize, row_count / requested + 1)
    }
}

/// Contiguous (first_row, count) ranges covering rows 1..=row_count
fn row_ranges(row_count: u64, num_threads: usize, per_thread: u64) -> Vec<(i64, u64)> {
    let mut ranges = Vec::with_capacity(num_threads);
    let mut first: u64 = 1;
    for _ in 0..num_threads {
        if first > row_count {
            break;
        }
        let count = per_thread.min(row_count - first + 1);
        ranges.push((first as i64, count));
        first += count;
    }
    ranges
}

/// Picks the error to report from a set of worker results: the first
/// failure that is not itself a cancellation, if any.
fn first_error<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut values = Vec::with_capacity(results.len());
    let mut cancelled = None;
    let mut failure = None;
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(Error::Cancelled) => cancelled = Some(Error::Cancelled),
            Err(err) => {
                if failure.is_none() {
                    failure = Some(err);
                }
            }
        }
    }
    match failure.or(cancelled) {
        Some(err) => Err(err),
        None => Ok(values),
    }
}

/// Settings for the lookup-construction phase
#[derive(Clone, Debug)]
pub struct LookupConfig {
    pub temp_dir: PathBuf,
    pub lookup_path: PathBuf,
    pub index_path: PathBuf,
    pub num_threads: usize,
    /// In-memory ceiling of the batch merger before a spill
    pub mem_limit: usize,
    /// Entries per producer batch
    pub batch_size: usize,
    /// Entries between sparse-index samples
    pub index_stride: u64,
    /// Depth of the producer-to-merger queue
    pub queue_depth: usize,
    pub progress: ProgressTracker,
    pub cancel: CancellationToken,
}

impl LookupConfig {
    /// Defaults rooted in `temp_dir`
    pub fn new(temp_dir: &Path) -> Self {
        Self {
            temp_dir: temp_dir.to_path_buf(),
            lookup_path: temp_dir.join("lookup.lku"),
            index_path: temp_dir.join("lookup.idx"),
            num_threads: num_cpus::get(),
            mem_limit: DEFAULT_MEM_LIMIT,
            batch_size: DEFAULT_BATCH_SIZE,
            index_stride: DEFAULT_INDEX_STRIDE,
            queue_depth: 8,
            progress: ProgressTracker::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Builds the sorted lookup file and its sparse index from the alignment
/// source. Returns the number of entries written.
pub fn build_lookup(source: &dyn AlignmentSource, cfg: &LookupConfig) -> Result<u64> {
    let row_count = source.row_count()?;
    let (num_threads, per_thread) = rows_per_thread(row_count, cfg.num_threads);
    let ranges = row_ranges(row_count, num_threads, per_thread);
    log::info!(
        "building lookup: {row_count} alignment rows across {} producer(s)",
        ranges.len()
    );

    let (batch_tx, batch_rx) = crossbeam_channel::bounded(cfg.queue_depth.max(1));
    let (run_tx, run_rx) = crossbeam_channel::unbounded();
    let cancel = cfg.cancel.clone();

    let (producer_results, merge_result, written) = std::thread::scope(|s| {
        let mut producer_handles = Vec::with_capacity(ranges.len());
        for &(first_row, count) in &ranges {
            let batch_tx = batch_tx.clone();
            let cancel = cancel.clone();
            let progress = cfg.progress.clone();
            producer_handles.push(s.spawn(move || {
                let producer =
                    LookupProducer::new(source, batch_tx, cfg.batch_size, cancel.clone(), progress);
                let result = producer.produce_range(first_row, count);
                if result.is_err() {
                    cancel.cancel();
                }
                result
            }));
        }
        drop(batch_tx);

        let merge_cancel = cancel.clone();
        let merge_handle = s.spawn(move || {
            let mut merger = BatchMerger::new(&cfg.temp_dir, cfg.mem_limit, run_tx);
            let result = (|| -> Result<usize> {
                loop {
                    merge_cancel.check()?;
                    match batch_rx.recv_timeout(POLL_INTERVAL) {
                        Ok(batch) => merger.absorb(batch)?,
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                merger.finish()
            })();
            if result.is_err() {
                merge_cancel.cancel();
            }
            result
        });

        let run_cancel = cancel.clone();
        let run_handle = s.spawn(move || {
            let merger = RunMerger::new(&cfg.lookup_path, &cfg.index_path, cfg.index_stride);
            let result = merger.run(&run_rx, &run_cancel);
            if result.is_err() {
                run_cancel.cancel();
            }
            result
        });

        let producer_results: Vec<Result<()>> = producer_handles
            .into_iter()
            .enumerate()
            .map(|(i, h)| {
                h.join()
                    .unwrap_or(Err(JoinError::WorkerPanic(i).into()))
            })
            .collect();
        let merge_result = merge_handle
            .join()
            .unwrap_or(Err(JoinError::WorkerPanic(ranges.len()).into()));
        let written = run_handle
            .join()
            .unwrap_or(Err(JoinError::WorkerPanic(ranges.len() + 1).into()));
        (producer_results, merge_result, written)
    });

    let mut results: Vec<Result<()>> = producer_results;
    results.push(merge_result.map(|_| ()));
    let entries = match written {
        Ok(entries) => entries,
        Err(err) => {
            results.push(Err(err));
            0
        }
    };
    let outcome = first_error(results).map(|_| entries);
    if outcome.is_err() {
        remove_lookup_artifacts(cfg);
    }
    outcome
}

/// Best-effort removal of the lookup file, its index and any spill runs
/// still on disk after an aborted build.
fn remove_lookup_artifacts(cfg: &LookupConfig) {
    let _ = std::fs::remove_file(&cfg.lookup_path);
    let _ = std::fs::remove_file(&cfg.index_path);
    if let Ok(entries) = std::fs::read_dir(&cfg.temp_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("run-") && name.ends_with(".lku") {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
}

/// Settings for the join phase
pub struct JoinConfig {
    pub format: FormatKind,
    pub layout: Layout,
    pub options: JoinOptions,
    pub temp_dir: PathBuf,
    pub dest: OutputDest,
    pub num_threads: usize,
    pub header: HeaderBuilder,
    pub progress: ProgressTracker,
    pub cancel: CancellationToken,
}

impl JoinConfig {
    pub fn new(temp_dir: &Path, dest: OutputDest, format: FormatKind, layout: Layout) -> Self {
        Self {
            format,
            layout,
            options: JoinOptions::default(),
            temp_dir: temp_dir.to_path_buf(),
            dest,
            num_threads: num_cpus::get(),
            header: default_header_builder(),
            progress: ProgressTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn field_selection(&self, options: &JoinOptions) -> FieldSelection {
        FieldSelection {
            with_name: !options.name_as_rowid,
            with_quality: self.format.has_quality(),
            with_read_type: true,
            with_spot_group: options.emit_spot_group,
        }
    }
}

/// Joins the sequence source against a finished lookup file and produces
/// the final output. Returns the merged per-worker counters.
pub fn execute_join(
    source: &dyn SequenceSource,
    lookup: &LookupFile,
    cfg: &JoinConfig,
) -> Result<JoinStats> {
    let options = cfg.options.clone().corrected(source.has_name_column());
    let filter = BaseFilter::from_option(options.base_filter_pattern.as_deref())?;
    cfg.dest.validate(cfg.layout.destinations())?;

    let row_count = source.row_count()?;
    let (num_threads, per_thread) = rows_per_thread(row_count, cfg.num_threads);
    let ranges = row_ranges(row_count, num_threads, per_thread);
    log::info!(
        "joining {row_count} spots across {} worker(s)",
        ranges.len()
    );

    let registry = TempPartRegistry::new(&cfg.temp_dir, cfg.layout.destinations(), ranges.len());
    let fields = cfg.field_selection(&options);
    let cancel = cfg.cancel.clone();

    let results = std::thread::scope(|s| {
        let mut handles = Vec::with_capacity(ranges.len());
        for (thread_index, &(first_row, count)) in ranges.iter().enumerate() {
            let cancel = cancel.clone();
            let progress = cfg.progress.clone();
            let options = options.clone();
            let filter = filter.clone();
            let header = cfg.header.clone();
            let registry = &registry;
            handles.push(s.spawn(move || {
                let worker = || -> Result<JoinStats> {
                    let parts = registry.open_parts(thread_index)?;
                    let printer =
                        FlexPrinter::new(cfg.format, source.accession(), header, parts);
                    let mut engine = JoinEngine::new(
                        cfg.format,
                        cfg.layout,
                        &options,
                        filter,
                        lookup.reader(),
                        printer,
                    );
                    for rec in source.open_range(first_row, count, &fields)? {
                        cancel.check()?;
                        engine.process(&rec?)?;
                        progress.add(1);
                    }
                    engine.finish()
                };
                let result = worker();
                if result.is_err() {
                    cancel.cancel();
                }
                result
            }));
        }
        handles
            .into_iter()
            .enumerate()
            .map(|(i, h)| h.join().unwrap_or(Err(JoinError::WorkerPanic(i).into())))
            .collect::<Vec<Result<JoinStats>>>()
    });

    let per_worker = match first_error(results) {
        Ok(stats) => stats,
        Err(err) => {
            registry.cleanup();
            return Err(err);
        }
    };

    let mut stats = JoinStats::new();
    for worker_stats in &per_worker {
        stats.merge(worker_stats);
    }
    registry.concatenate(&cfg.dest)?;
    Ok(stats)
}

/// Runs both phases end to end: builds the lookup table, joins against it,
/// and deletes the intermediate lookup and index files afterwards.
pub fn extract(
    alignments: &dyn AlignmentSource,
    sequences: &dyn SequenceSource,
    lookup_cfg: &LookupConfig,
    join_cfg: &JoinConfig,
) -> Result<JoinStats> {
    build_lookup(alignments, lookup_cfg)?;
    let lookup = LookupFile::open(&lookup_cfg.lookup_path, &lookup_cfg.index_path)?;
    let stats = execute_join(sequences, &lookup, join_cfg);
    let _ = std::fs::remove_file(&lookup_cfg.lookup_path);
    let _ = std::fs::remove_file(&lookup_cfg.index_path);
    stats
}

/// Re-scans the alignment source and confirms every key resolves to the
/// bases it was built from. Returns the number of verified entries.
pub fn verify_lookup(source: &dyn AlignmentSource, lookup: &LookupFile) -> Result<u64> {
    let mut reader = lookup.reader();
    let mut fetched = Vec::new();
    let mut verified = 0;
    let row_count = source.row_count()?;
    for row in source.open_range(1, row_count)? {
        let row = row?;
        reader.fetch(row.spot_id, row.read_number, false, &mut fetched)?;
        if fetched != row.bases {
            return Err(LookupError::BaseMismatch {
                spot_id: row.spot_id,
                read_number: row.read_number,
            }
            .into());
        }
        verified += 1;
    }
    Ok(verified)
}
