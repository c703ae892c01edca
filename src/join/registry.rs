//! Temp part files and final-output concatenation
//!
//! Every join worker writes into private part files, one per destination
//! stream, so no output locking is needed during the join. After the
//! workers are joined, the registry concatenates parts per destination in
//! worker-index order, which equals ascending row-range order and therefore
//! restores the global record order. Concatenation is a plain byte copy.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, JoinError};
use crate::Result;

/// Where the final output goes
#[derive(Clone, Debug)]
pub enum OutputDest {
    Stdout,
    File {
        path: PathBuf,
        force: bool,
        append: bool,
    },
}

impl OutputDest {
    /// Fails fast if any destination file exists and neither overwrite nor
    /// append was requested. Runs before any worker starts.
    pub fn validate(&self, dest_ids: &[u32]) -> Result<()> {
        if let OutputDest::File {
            path,
            force: false,
            append: false,
        } = self
        {
            for &dst_id in dest_ids {
                let target = dest_path(path, dst_id);
                if target.exists() {
                    return Err(
                        ConfigError::OutputExists(target.display().to_string()).into()
                    );
                }
            }
        }
        Ok(())
    }
}

/// Final path for a destination stream: id 0 keeps the caller's path, ids 1
/// and 2 get `_1`/`_2` inserted before the extension.
#[must_use]
pub fn dest_path(base: &Path, dst_id: u32) -> PathBuf {
    if dst_id == 0 {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
    let name = match base.extension() {
        Some(ext) => format!("{stem}_{dst_id}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{dst_id}"),
    };
    base.with_file_name(name)
}

/// One worker's set of open part files, keyed by destination id
pub struct PartWriters {
    writers: Vec<(u32, BufWriter<File>)>,
}

impl PartWriters {
    /// Writes `bytes` to the part for `dst_id`
    pub fn write(&mut self, dst_id: u32, bytes: &[u8]) -> Result<()> {
        let writer = self
            .writers
            .iter_mut()
            .find(|(id, _)| *id == dst_id)
            .map(|(_, w)| w)
            .ok_or(JoinError::UnknownDestination(dst_id))?;
        writer.write_all(bytes)?;
        Ok(())
    }

    /// Flushes and closes every part
    pub fn finish(mut self) -> Result<()> {
        for (_, writer) in &mut self.writers {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Owns the naming and lifecycle of all part files of one join run
pub struct TempPartRegistry {
    temp_dir: PathBuf,
    dest_ids: Vec<u32>,
    num_threads: usize,
}

impl TempPartRegistry {
    pub fn new(temp_dir: &Path, dest_ids: &[u32], num_threads: usize) -> Self {
        Self {
            temp_dir: temp_dir.to_path_buf(),
            dest_ids: dest_ids.to_vec(),
            num_threads,
        }
    }

    fn part_path(&self, dst_id: u32, thread_index: usize) -> PathBuf {
        self.temp_dir
            .join(format!("part_{dst_id}_{thread_index:04}"))
    }

    /// Creates the part files for one worker
    pub fn open_parts(&self, thread_index: usize) -> Result<PartWriters> {
        let mut writers = Vec::with_capacity(self.dest_ids.len());
        for &dst_id in &self.dest_ids {
            let file = File::create(self.part_path(dst_id, thread_index))?;
            writers.push((dst_id, BufWriter::new(file)));
        }
        Ok(PartWriters { writers })
    }

    /// Concatenates all parts into the final destination, in destination-id
    /// then worker-index order, deleting each part after it was copied.
    /// Destination files that end up empty are removed again.
    pub fn concatenate(&self, dest: &OutputDest) -> Result<()> {
        match dest {
            OutputDest::Stdout => {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                for &dst_id in &self.dest_ids {
                    self.copy_parts(dst_id, &mut out)?;
                }
                out.flush()?;
            }
            OutputDest::File { path, append, .. } => {
                for &dst_id in &self.dest_ids {
                    let target = dest_path(path, dst_id);
                    let file = if *append {
                        OpenOptions::new().create(true).append(true).open(&target)?
                    } else {
                        File::create(&target)?
                    };
                    let mut out = BufWriter::new(file);
                    let copied = self.copy_parts(dst_id, &mut out)?;
                    out.flush()?;
                    drop(out);
                    if copied == 0 && !*append {
                        std::fs::remove_file(&target)?;
                    } else {
                        log::info!("wrote {copied} bytes to {}", target.display());
                    }
                }
            }
        }
        Ok(())
    }

    fn copy_parts<W: Write>(&self, dst_id: u32, out: &mut W) -> Result<u64> {
        let mut copied = 0;
        for thread_index in 0..self.num_threads {
            let part = self.part_path(dst_id, thread_index);
            if part.exists() {
                let mut reader = File::open(&part)?;
                copied += std::io::copy(&mut reader, out)?;
                std::fs::remove_file(&part)?;
            }
        }
        Ok(copied)
    }

    /// Best-effort removal of any parts still on disk (aborted runs)
    pub fn cleanup(&self) {
        for &dst_id in &self.dest_ids {
            for thread_index in 0..self.num_threads {
                let part = self.part_path(dst_id, thread_index);
                if part.exists() {
                    let _ = std::fs::remove_file(&part);
                }
            }
        }
    }
}
