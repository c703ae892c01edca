//! End-to-end runs over in-memory sources: lookup construction, the join
//! phase under every layout, and the ordering/consistency properties the
//! whole pipeline rests on.

use std::path::Path;

use spotjoin::{
    build_lookup, execute_join, extract, verify_lookup, AlignmentRow, AlignmentSource,
    FieldSelection, FormatKind, JoinConfig, JoinOptions, Layout, LookupConfig, LookupFile,
    OutputDest, SequenceSource, SpotRecord, READ_TYPE_BIOLOGICAL,
};

#[derive(Clone, Default)]
struct MemAlignments(Vec<AlignmentRow>);

impl AlignmentSource for MemAlignments {
    fn row_count(&self) -> spotjoin::Result<u64> {
        Ok(self.0.len() as u64)
    }

    fn open_range(
        &self,
        first_row: i64,
        count: u64,
    ) -> spotjoin::Result<Box<dyn Iterator<Item = spotjoin::Result<AlignmentRow>> + Send + '_>>
    {
        let start = usize::try_from(first_row - 1).unwrap();
        let end = (start + count as usize).min(self.0.len());
        Ok(Box::new(self.0[start..end].iter().cloned().map(Ok)))
    }
}

/// Alignment source whose cursor fails once it reaches `fail_after` rows
struct FlakyAlignments {
    rows: Vec<AlignmentRow>,
    fail_after: usize,
}

impl AlignmentSource for FlakyAlignments {
    fn row_count(&self) -> spotjoin::Result<u64> {
        Ok(self.rows.len() as u64)
    }

    fn open_range(
        &self,
        first_row: i64,
        count: u64,
    ) -> spotjoin::Result<Box<dyn Iterator<Item = spotjoin::Result<AlignmentRow>> + Send + '_>>
    {
        let start = usize::try_from(first_row - 1).unwrap();
        let end = (start + count as usize).min(self.rows.len());
        let fail_after = self.fail_after;
        Ok(Box::new(self.rows[start..end].iter().enumerate().map(
            move |(i, row)| {
                if start + i >= fail_after {
                    Err(std::io::Error::other("alignment cursor read failed").into())
                } else {
                    Ok(row.clone())
                }
            },
        )))
    }
}

#[derive(Clone)]
struct MemSequences {
    rows: Vec<SpotRecord>,
    named: bool,
}

impl MemSequences {
    fn new(rows: Vec<SpotRecord>) -> Self {
        Self { rows, named: true }
    }
}

impl SequenceSource for MemSequences {
    fn accession(&self) -> &str {
        "TEST001"
    }

    fn row_count(&self) -> spotjoin::Result<u64> {
        Ok(self.rows.len() as u64)
    }

    fn has_name_column(&self) -> bool {
        self.named
    }

    fn open_range(
        &self,
        first_row: i64,
        count: u64,
        _fields: &FieldSelection,
    ) -> spotjoin::Result<Box<dyn Iterator<Item = spotjoin::Result<SpotRecord>> + Send + '_>>
    {
        let start = usize::try_from(first_row - 1).unwrap();
        let end = (start + count as usize).min(self.rows.len());
        Ok(Box::new(self.rows[start..end].iter().cloned().map(Ok)))
    }
}

/// Sequence source whose cursor fails at a given row id
#[derive(Clone)]
struct FlakySequences {
    inner: MemSequences,
    fail_from: i64,
}

impl SequenceSource for FlakySequences {
    fn accession(&self) -> &str {
        self.inner.accession()
    }

    fn row_count(&self) -> spotjoin::Result<u64> {
        self.inner.row_count()
    }

    fn has_name_column(&self) -> bool {
        self.inner.has_name_column()
    }

    fn open_range(
        &self,
        first_row: i64,
        count: u64,
        fields: &FieldSelection,
    ) -> spotjoin::Result<Box<dyn Iterator<Item = spotjoin::Result<SpotRecord>> + Send + '_>>
    {
        let fail_from = self.fail_from;
        let rows = self.inner.open_range(first_row, count, fields)?;
        Ok(Box::new(rows.map(move |rec| {
            let rec = rec?;
            if rec.row_id >= fail_from {
                Err(std::io::Error::other("sequence cursor read failed").into())
            } else {
                Ok(rec)
            }
        })))
    }
}

fn paired_spot(
    row_id: i64,
    alignment_ids: [u64; 2],
    inline: &[u8],
    quality: &[u8],
    read_lengths: [u32; 2],
) -> SpotRecord {
    SpotRecord {
        row_id,
        alignment_ids,
        read_lengths: read_lengths.to_vec(),
        read_types: vec![READ_TYPE_BIOLOGICAL, READ_TYPE_BIOLOGICAL],
        name: format!("spot{row_id}").into_bytes(),
        inline_bases: inline.to_vec(),
        quality: quality.to_vec(),
        spot_group: Vec::new(),
    }
}

fn run(
    alignments: &MemAlignments,
    sequences: &MemSequences,
    dir: &Path,
    format: FormatKind,
    layout: Layout,
    options: JoinOptions,
) -> spotjoin::Result<spotjoin::JoinStats> {
    let out = dir.join("out");
    std::fs::create_dir_all(&out).unwrap();
    let lookup_cfg = LookupConfig {
        num_threads: 1,
        ..LookupConfig::new(dir)
    };
    let mut join_cfg = JoinConfig::new(
        dir,
        OutputDest::File {
            path: out.join("result.txt"),
            force: true,
            append: false,
        },
        format,
        layout,
    );
    join_cfg.options = options;
    join_cfg.num_threads = 1;
    extract(alignments, sequences, &lookup_cfg, &join_cfg)
}

fn output(dir: &Path, suffix: &str) -> String {
    std::fs::read_to_string(dir.join("out").join(format!("result{suffix}.txt")))
        .unwrap_or_default()
}

// fully unaligned pair, split-spot FASTQ: straight from inline data
#[test]
fn unaligned_pair_split_spot() {
    let dir = tempfile::tempdir().unwrap();
    let sequences = MemSequences::new(vec![paired_spot(
        1,
        [0, 0],
        &[b'A'; 100],
        &[b'I'; 100],
        [50, 50],
    )]);
    let stats = run(
        &MemAlignments::default(),
        &sequences,
        dir.path(),
        FormatKind::Fastq,
        Layout::SplitSpot,
        JoinOptions::default(),
    )
    .unwrap();
    assert_eq!(stats.spots_read, 1);
    assert_eq!(stats.reads_read, 2);
    assert_eq!(stats.reads_written, 2);

    let text = output(dir.path(), "");
    assert_eq!(text.matches("@TEST001.1").count(), 2);
    assert_eq!(text.matches("length=50").count(), 2);
}

// half-aligned pair, whole-spot FASTQ: one combined record
#[test]
fn half_aligned_whole_spot() {
    let dir = tempfile::tempdir().unwrap();
    let alignments = MemAlignments(vec![AlignmentRow {
        spot_id: 1,
        read_number: 2,
        bases: vec![b'G'; 50],
    }]);
    let sequences = MemSequences::new(vec![paired_spot(
        1,
        [0, 9],
        &[b'A'; 50],
        &[b'I'; 100],
        [50, 50],
    )]);
    let stats = run(
        &alignments,
        &sequences,
        dir.path(),
        FormatKind::Fastq,
        Layout::WholeSpot,
        JoinOptions::default(),
    )
    .unwrap();
    assert_eq!(stats.reads_written, 2);

    let text = output(dir.path(), "");
    let expected_bases = format!("{}{}", "A".repeat(50), "G".repeat(50));
    assert!(text.contains("length=100"));
    assert!(text.contains(&expected_bases));
}

// half-aligned whole-spot with a bad quality length: invalid, not fatal
#[test]
fn half_aligned_bad_quality_is_counted_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let alignments = MemAlignments(vec![AlignmentRow {
        spot_id: 1,
        read_number: 2,
        bases: vec![b'G'; 50],
    }]);
    let sequences = MemSequences::new(vec![
        paired_spot(1, [0, 9], &[b'A'; 50], &[b'I'; 80], [50, 50]),
        paired_spot(2, [0, 0], &[b'C'; 100], &[b'I'; 100], [50, 50]),
    ]);
    let stats = run(
        &alignments,
        &sequences,
        dir.path(),
        FormatKind::Fastq,
        Layout::WholeSpot,
        JoinOptions::default(),
    )
    .unwrap();
    assert_eq!(stats.reads_invalid, 1);
    // the second spot still made it out
    assert_eq!(stats.reads_written, 2);
    assert!(output(dir.path(), "").contains("@TEST001.2"));
}

// fully aligned pair, split-file FASTA: two lookups, two destinations
#[test]
fn aligned_pair_split_file_fasta() {
    let dir = tempfile::tempdir().unwrap();
    let alignments = MemAlignments(vec![
        AlignmentRow {
            spot_id: 1,
            read_number: 1,
            bases: b"ACGTACGT".to_vec(),
        },
        AlignmentRow {
            spot_id: 1,
            read_number: 2,
            bases: b"TTGGCCAA".to_vec(),
        },
    ]);
    let sequences = MemSequences::new(vec![paired_spot(
        1,
        [4, 5],
        b"",
        b"",
        [8, 8],
    )]);
    let stats = run(
        &alignments,
        &sequences,
        dir.path(),
        FormatKind::Fasta,
        Layout::SplitFile,
        JoinOptions::default(),
    )
    .unwrap();
    assert_eq!(stats.reads_written, 2);

    let r1 = output(dir.path(), "_1");
    let r2 = output(dir.path(), "_2");
    assert_eq!(r1, ">TEST001.1 spot1 length=8\nACGTACGT\n");
    assert_eq!(r2, ">TEST001.1 spot1 length=8\nTTGGCCAA\n");
    // no quality lines anywhere
    assert!(!r1.contains('+'));
}

// base filter not matching either read: spot dropped silently
#[test]
fn base_filter_excludes_spot() {
    let dir = tempfile::tempdir().unwrap();
    let sequences = MemSequences::new(vec![paired_spot(
        1,
        [0, 0],
        &[b'A'; 20],
        &[b'I'; 20],
        [10, 10],
    )]);
    let stats = run(
        &MemAlignments::default(),
        &sequences,
        dir.path(),
        FormatKind::Fastq,
        Layout::SplitSpot,
        JoinOptions {
            base_filter_pattern: Some("GGGGG".to_string()),
            ..JoinOptions::default()
        },
    )
    .unwrap();
    assert_eq!(stats.reads_written, 0);
    assert_eq!(stats.reads_invalid, 0);
    assert!(output(dir.path(), "").is_empty());
}

// short quality string: row invalid, the run keeps going
#[test]
fn length_mismatch_skips_row_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let sequences = MemSequences::new(vec![
        paired_spot(1, [0, 0], &[b'A'; 20], &[b'I'; 12], [10, 10]),
        paired_spot(2, [0, 0], &[b'C'; 20], &[b'I'; 20], [10, 10]),
    ]);
    let stats = run(
        &MemAlignments::default(),
        &sequences,
        dir.path(),
        FormatKind::Fastq,
        Layout::SplitSpot,
        JoinOptions::default(),
    )
    .unwrap();
    assert_eq!(stats.reads_invalid, 1);
    assert_eq!(stats.reads_written, 2);
    assert_eq!(stats.spots_read, 2);
}

// split-3: paired survivors to _1/_2, singleton survivors to the base file
#[test]
fn split_3_routing() {
    let dir = tempfile::tempdir().unwrap();
    let sequences = MemSequences::new(vec![
        paired_spot(1, [0, 0], &[b'A'; 20], &[b'I'; 20], [10, 10]),
        // read 2 shorter than the minimum: read 1 becomes a singleton
        paired_spot(2, [0, 0], &[b'C'; 14], &[b'I'; 14], [10, 4]),
    ]);
    let stats = run(
        &MemAlignments::default(),
        &sequences,
        dir.path(),
        FormatKind::Fastq,
        Layout::Split3,
        JoinOptions {
            min_read_length: 5,
            ..JoinOptions::default()
        },
    )
    .unwrap();
    assert_eq!(stats.reads_written, 3);
    assert_eq!(stats.reads_too_short, 1);

    assert!(output(dir.path(), "_1").contains("@TEST001.1"));
    assert!(output(dir.path(), "_2").contains("@TEST001.1"));
    let unpaired = output(dir.path(), "");
    assert!(unpaired.contains("@TEST001.2"));
    assert!(!unpaired.contains("@TEST001.1"));
}

// lookup construction with spills: final file strictly ascending, every
// key resolvable
#[test]
fn lookup_file_is_sorted_and_complete() {
    let dir = tempfile::tempdir().unwrap();
    let mut rows = Vec::new();
    for spot_id in 1..=500u64 {
        for read_number in [1u32, 2] {
            rows.push(AlignmentRow {
                spot_id,
                read_number,
                bases: vec![b"ACGT"[(spot_id % 4) as usize]; 12],
            });
        }
    }
    let alignments = MemAlignments(rows);
    let cfg = LookupConfig {
        num_threads: 2,
        mem_limit: 4096, // force several spills
        batch_size: 64,
        ..LookupConfig::new(dir.path())
    };
    let written = build_lookup(&alignments, &cfg).unwrap();
    assert_eq!(written, 1000);

    let lookup = LookupFile::open(&cfg.lookup_path, &cfg.index_path).unwrap();
    assert_eq!(verify_lookup(&alignments, &lookup).unwrap(), 1000);

    // walk the raw file and check strict key ordering
    use spotjoin::lookup::entry::LookupEntry;
    let mut reader =
        std::io::BufReader::new(std::fs::File::open(&cfg.lookup_path).unwrap());
    let mut offset = 0;
    let mut last = None;
    while let Some(e) = LookupEntry::read_from(&mut reader, &mut offset).unwrap() {
        if let Some(prev) = last {
            assert!(e.key > prev, "keys must be strictly ascending");
        }
        last = Some(e.key);
    }
}

// duplicate (spot, read) pairs in the alignment source must fail the build
#[test]
fn duplicate_alignment_rows_fail_lookup_build() {
    let dir = tempfile::tempdir().unwrap();
    let alignments = MemAlignments(vec![
        AlignmentRow {
            spot_id: 1,
            read_number: 1,
            bases: b"ACGT".to_vec(),
        },
        AlignmentRow {
            spot_id: 1,
            read_number: 1,
            bases: b"TTTT".to_vec(),
        },
    ]);
    let cfg = LookupConfig {
        num_threads: 1,
        ..LookupConfig::new(dir.path())
    };
    assert!(build_lookup(&alignments, &cfg).is_err());
}

// multi-worker join: concatenated output keeps ascending row order
#[test]
fn ordering_preserved_across_workers() {
    let dir = tempfile::tempdir().unwrap();
    let rows: Vec<SpotRecord> = (1..=400)
        .map(|row_id| SpotRecord {
            row_id,
            alignment_ids: [0, 0],
            read_lengths: vec![8],
            read_types: vec![READ_TYPE_BIOLOGICAL],
            name: format!("spot{row_id}").into_bytes(),
            inline_bases: b"ACGTACGT".to_vec(),
            quality: b"IIIIIIII".to_vec(),
            spot_group: Vec::new(),
        })
        .collect();
    let sequences = MemSequences::new(rows);

    let out = dir.path().join("ordered.fastq");
    let lookup_cfg = LookupConfig::new(dir.path());
    build_lookup(&MemAlignments::default(), &lookup_cfg).unwrap();
    let lookup = LookupFile::open(&lookup_cfg.lookup_path, &lookup_cfg.index_path).unwrap();

    let mut join_cfg = JoinConfig::new(
        dir.path(),
        OutputDest::File {
            path: out.clone(),
            force: true,
            append: false,
        },
        FormatKind::Fastq,
        Layout::SplitSpot,
    );
    join_cfg.num_threads = 4;
    let stats = execute_join(&sequences, &lookup, &join_cfg).unwrap();
    assert_eq!(stats.reads_written, 400);

    let text = std::fs::read_to_string(&out).unwrap();
    let ids: Vec<i64> = text
        .lines()
        .filter(|l| l.starts_with("@TEST001."))
        .map(|l| {
            l.trim_start_matches("@TEST001.")
                .split(' ')
                .next()
                .unwrap()
                .parse()
                .unwrap()
        })
        .collect();
    assert_eq!(ids.len(), 400);
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
}

// min_read_length filtering is idempotent: re-running the join over the
// survivors changes nothing
#[test]
fn min_length_filter_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let spots = vec![
        paired_spot(1, [0, 0], &[b'A'; 20], &[b'I'; 20], [10, 10]),
        paired_spot(2, [0, 0], &[b'C'; 13], &[b'I'; 13], [10, 3]),
        paired_spot(3, [0, 0], &[b'G'; 6], &[b'I'; 6], [3, 3]),
    ];
    let options = JoinOptions {
        min_read_length: 5,
        ..JoinOptions::default()
    };
    let first = run(
        &MemAlignments::default(),
        &MemSequences::new(spots.clone()),
        dir.path(),
        FormatKind::Fastq,
        Layout::SplitSpot,
        options.clone(),
    )
    .unwrap();
    assert_eq!(first.reads_written, 3);
    assert_eq!(first.reads_too_short, 3);

    // keep only spots whose reads all survived, run again
    let survivors: Vec<SpotRecord> = spots
        .into_iter()
        .filter(|s| s.read_lengths.iter().all(|&l| l >= 5))
        .collect();
    let dir2 = tempfile::tempdir().unwrap();
    let second = run(
        &MemAlignments::default(),
        &MemSequences::new(survivors),
        dir2.path(),
        FormatKind::Fastq,
        Layout::SplitSpot,
        options,
    )
    .unwrap();
    assert_eq!(second.reads_written, 2);
    assert_eq!(second.reads_too_short, 0);
}

// missing NAME column forces row-id naming
#[test]
fn row_id_naming_without_name_column() {
    let dir = tempfile::tempdir().unwrap();
    let mut sequences = MemSequences::new(vec![paired_spot(
        7,
        [0, 0],
        &[b'A'; 8],
        &[b'I'; 8],
        [4, 4],
    )]);
    sequences.named = false;
    let stats = run(
        &MemAlignments::default(),
        &sequences,
        dir.path(),
        FormatKind::Fastq,
        Layout::SplitSpot,
        JoinOptions::default(),
    )
    .unwrap();
    assert_eq!(stats.reads_written, 2);
    assert!(output(dir.path(), "").contains("@TEST001.7 7 length=4"));
}

// intermediate lookup artifacts are deleted by extract()
#[test]
fn extract_removes_lookup_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let sequences = MemSequences::new(vec![paired_spot(
        1,
        [0, 0],
        &[b'A'; 8],
        &[b'I'; 8],
        [4, 4],
    )]);
    run(
        &MemAlignments::default(),
        &sequences,
        dir.path(),
        FormatKind::Fastq,
        Layout::SplitSpot,
        JoinOptions::default(),
    )
    .unwrap();
    assert!(!dir.path().join("lookup.lku").exists());
    assert!(!dir.path().join("lookup.idx").exists());
}

// an aborted lookup build leaves no partial artifacts behind
#[test]
fn failed_lookup_build_removes_partial_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let rows = (1..=600u64)
        .map(|spot_id| AlignmentRow {
            spot_id,
            read_number: 1,
            bases: vec![b'A'; 16],
        })
        .collect();
    let alignments = FlakyAlignments {
        rows,
        fail_after: 500,
    };
    let cfg = LookupConfig {
        num_threads: 1,
        mem_limit: 2048, // several runs hit the disk before the failure
        batch_size: 32,
        ..LookupConfig::new(dir.path())
    };
    let err = build_lookup(&alignments, &cfg).unwrap_err();
    assert!(matches!(err, spotjoin::Error::IoError(_)));

    let leftovers: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(leftovers.is_empty(), "leftover artifacts: {leftovers:?}");
}

// a failing worker cancels its siblings: the real error is reported, no
// final output appears and no part files survive
#[test]
fn worker_error_aborts_join_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let rows: Vec<SpotRecord> = (1..=400)
        .map(|row_id| SpotRecord {
            row_id,
            alignment_ids: [0, 0],
            read_lengths: vec![8],
            read_types: vec![READ_TYPE_BIOLOGICAL],
            name: format!("spot{row_id}").into_bytes(),
            inline_bases: b"ACGTACGT".to_vec(),
            quality: b"IIIIIIII".to_vec(),
            spot_group: Vec::new(),
        })
        .collect();
    let sequences = FlakySequences {
        inner: MemSequences::new(rows),
        fail_from: 250,
    };

    let lookup_cfg = LookupConfig::new(dir.path());
    build_lookup(&MemAlignments::default(), &lookup_cfg).unwrap();
    let lookup = LookupFile::open(&lookup_cfg.lookup_path, &lookup_cfg.index_path).unwrap();

    let out = dir.path().join("aborted.fastq");
    let mut join_cfg = JoinConfig::new(
        dir.path(),
        OutputDest::File {
            path: out.clone(),
            force: false,
            append: false,
        },
        FormatKind::Fastq,
        Layout::SplitSpot,
    );
    join_cfg.num_threads = 4;
    let err = execute_join(&sequences, &lookup, &join_cfg).unwrap_err();
    assert!(matches!(err, spotjoin::Error::IoError(_)));
    assert!(!out.exists());

    let parts: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("part_"))
        .collect();
    assert!(parts.is_empty(), "stray part files: {parts:?}");
}

// existing output without force or append refuses to run
#[test]
fn existing_output_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("exists.fastq");
    std::fs::write(&out, b"keep me").unwrap();

    let sequences = MemSequences::new(vec![paired_spot(
        1,
        [0, 0],
        &[b'A'; 8],
        &[b'I'; 8],
        [4, 4],
    )]);
    let lookup_cfg = LookupConfig::new(dir.path());
    build_lookup(&MemAlignments::default(), &lookup_cfg).unwrap();
    let lookup = LookupFile::open(&lookup_cfg.lookup_path, &lookup_cfg.index_path).unwrap();
    let join_cfg = JoinConfig::new(
        dir.path(),
        OutputDest::File {
            path: out.clone(),
            force: false,
            append: false,
        },
        FormatKind::Fastq,
        Layout::SplitSpot,
    );
    assert!(execute_join(&sequences, &lookup, &join_cfg).is_err());
    assert_eq!(std::fs::read(&out).unwrap(), b"keep me");
}
