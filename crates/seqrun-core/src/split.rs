// crates/seqrun-core/src/split.rs
// ============================================================================
// Module: seqrun File Splitter
// Description: Record-group aligned splitting of FASTA/FASTQ files and pairs.
// Purpose: Produce byte-budgeted chunk files for parallel job execution.
// Dependencies: crate::error
// ============================================================================

//! ## Overview
//! [`Splitter`] is a lazy iterator over chunk tuples. Each chunk holds a whole
//! number of record groups (default four lines). Paired files are read in
//! lockstep so the k-th chunk of every file covers the same record indices.
//! A chunk is closed when adding the next group would push any file of the
//! tuple past the byte budget; a single oversized group still gets a chunk of
//! its own. Bytes are copied verbatim, so concatenating the chunks of a file in
//! order reproduces it exactly.
//!
//! Chunk files are named from a fixed prefix and are overwritten by later
//! runs that reuse the same working directory.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use crate::error::JobError;
use crate::error::ValidationError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default number of lines per record group.
pub const DEFAULT_GROUP_SIZE: usize = 4;
/// File name prefix for every temporary file a run writes.
pub const WORK_PREFIX: &str = "seqrun_split_";
/// Extensions of record-oriented formats that may be split.
pub const SPLITTABLE_EXTENSIONS: &[&str] =
    &["fastq", "fq", "fasta", "fa", "fna", "ffn", "faa", "frn"];

// ============================================================================
// SECTION: Options
// ============================================================================

/// Splitting parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOptions {
    /// Per-file byte budget of one chunk.
    pub max_bytes: u64,
    /// Lines per record group.
    pub group_size: usize,
    /// Directory that receives chunk files.
    pub work_dir: PathBuf,
}

impl SplitOptions {
    /// Creates options with the default group size.
    #[must_use]
    pub fn new(max_bytes: u64, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_bytes,
            group_size: DEFAULT_GROUP_SIZE,
            work_dir: work_dir.into(),
        }
    }
}

/// Returns an error unless `path` has a splittable extension.
///
/// # Errors
///
/// Returns [`ValidationError::UnsupportedFormat`].
pub fn check_splittable(path: &Path) -> Result<(), ValidationError> {
    let accepted = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SPLITTABLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
    if accepted { Ok(()) } else { Err(ValidationError::UnsupportedFormat(path.display().to_string())) }
}

// ============================================================================
// SECTION: Chunks
// ============================================================================

/// One aligned chunk tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based chunk index.
    pub index: usize,
    /// One chunk file per input file, in input order.
    pub paths: Vec<PathBuf>,
    /// Number of record groups in each file of the tuple.
    pub groups: usize,
}

/// Source file being split.
#[derive(Debug)]
struct SplitSource {
    /// Buffered reader over the source.
    reader: BufReader<File>,
    /// Source display path.
    display: String,
    /// File stem used for chunk names.
    stem: String,
    /// Extension used for chunk names.
    extension: String,
}

/// Lazy chunk iterator over one file or a lockstep tuple of files.
#[derive(Debug)]
pub struct Splitter {
    /// Sources in input order.
    sources: Vec<SplitSource>,
    /// Splitting parameters.
    options: SplitOptions,
    /// Group read ahead that did not fit in the previous chunk.
    pending: Option<Vec<Vec<u8>>>,
    /// Index of the next chunk.
    next_index: usize,
    /// Set once every source is exhausted or an error was returned.
    finished: bool,
}

impl Splitter {
    /// Opens `paths` for lockstep splitting.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnsupportedFormat`] for non-splittable
    /// extensions, [`ValidationError::NotFound`] for missing files, and
    /// [`JobError::Io`] when the working directory cannot be created.
    pub fn new(paths: &[PathBuf], options: SplitOptions) -> Result<Self, JobError> {
        if paths.is_empty() {
            return Err(ValidationError::InvalidInput("nothing to split".to_string()).into());
        }
        if options.group_size == 0 || options.max_bytes == 0 {
            return Err(ValidationError::InvalidInput(
                "group size and byte budget must be non-zero".to_string(),
            )
            .into());
        }
        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            check_splittable(path)?;
            let file =
                File::open(path).map_err(|_| ValidationError::NotFound(path.display().to_string()))?;
            sources.push(SplitSource {
                reader: BufReader::new(file),
                display: path.display().to_string(),
                stem: path
                    .file_stem()
                    .map_or_else(|| "input".to_string(), |stem| stem.to_string_lossy().into()),
                extension: path
                    .extension()
                    .map_or_else(String::new, |ext| ext.to_string_lossy().into()),
            });
        }
        std::fs::create_dir_all(&options.work_dir).map_err(JobError::io)?;
        Ok(Self {
            sources,
            options,
            pending: None,
            next_index: 0,
            finished: false,
        })
    }

    /// Path of chunk `index` for source `position`.
    fn chunk_path(&self, position: usize, index: usize) -> PathBuf {
        let source = &self.sources[position];
        let name = if self.sources.len() == 1 {
            format!("{WORK_PREFIX}{}.chunk{index:04}.{}", source.stem, source.extension)
        } else {
            format!(
                "{WORK_PREFIX}{}.p{position}.chunk{index:04}.{}",
                source.stem, source.extension
            )
        };
        self.options.work_dir.join(name)
    }

    /// Reads one aligned group from every source; `None` at common EOF.
    fn read_aligned_group(&mut self) -> Result<Option<Vec<Vec<u8>>>, JobError> {
        let group_size = self.options.group_size;
        let mut groups = Vec::with_capacity(self.sources.len());
        for source in &mut self.sources {
            groups.push(read_group(&mut source.reader, group_size).map_err(JobError::io)?);
        }
        let present = groups.iter().filter(|group| group.is_some()).count();
        if present == 0 {
            return Ok(None);
        }
        if present < groups.len() {
            let names: Vec<&str> =
                self.sources.iter().map(|source| source.display.as_str()).collect();
            return Err(ValidationError::PairedLengthMismatch(names.join(", ")).into());
        }
        Ok(Some(groups.into_iter().flatten().collect()))
    }

    /// Writes the next chunk tuple, or returns `None` when input is exhausted.
    /// Files of a tuple that fails partway are removed before the error is
    /// returned.
    fn write_next(&mut self) -> Result<Option<Chunk>, JobError> {
        let first = match self.pending.take() {
            Some(group) => group,
            None => match self.read_aligned_group()? {
                Some(group) => group,
                None => return Ok(None),
            },
        };

        let index = self.next_index;
        let paths: Vec<PathBuf> =
            (0 .. self.sources.len()).map(|position| self.chunk_path(position, index)).collect();
        let groups = match self.fill_chunk(&paths, first) {
            Ok(groups) => groups,
            Err(err) => {
                for path in &paths {
                    let _ = std::fs::remove_file(path);
                }
                return Err(err);
            }
        };

        self.next_index += 1;
        Ok(Some(Chunk {
            index,
            paths,
            groups,
        }))
    }

    /// Writes `first` and every following group that fits the budget into
    /// `paths`. Returns the number of groups written.
    fn fill_chunk(&mut self, paths: &[PathBuf], first: Vec<Vec<u8>>) -> Result<usize, JobError> {
        let mut writers = Vec::with_capacity(paths.len());
        for path in paths {
            writers.push(BufWriter::new(File::create(path).map_err(JobError::io)?));
        }
        let mut sizes = vec![0u64; self.sources.len()];

        write_group(&mut writers, &mut sizes, &first)?;
        let mut groups = 1;
        while let Some(group) = self.read_aligned_group()? {
            let over_budget = sizes.iter().zip(&group).any(|(size, bytes)| {
                size.saturating_add(bytes.len() as u64) > self.options.max_bytes
            });
            if over_budget {
                self.pending = Some(group);
                break;
            }
            write_group(&mut writers, &mut sizes, &group)?;
            groups += 1;
        }
        for writer in &mut writers {
            writer.flush().map_err(JobError::io)?;
        }
        Ok(groups)
    }
}

impl Iterator for Splitter {
    type Item = Result<Chunk, JobError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.write_next() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads up to `group_size` lines verbatim. Returns `None` at EOF.
fn read_group(reader: &mut impl BufRead, group_size: usize) -> std::io::Result<Option<Vec<u8>>> {
    let mut group = Vec::new();
    for _ in 0 .. group_size {
        if reader.read_until(b'\n', &mut group)? == 0 {
            break;
        }
    }
    Ok(if group.is_empty() { None } else { Some(group) })
}

/// Appends one aligned group to every writer.
fn write_group(
    writers: &mut [BufWriter<File>],
    sizes: &mut [u64],
    group: &[Vec<u8>],
) -> Result<(), JobError> {
    for ((writer, size), bytes) in writers.iter_mut().zip(sizes.iter_mut()).zip(group) {
        writer.write_all(bytes).map_err(JobError::io)?;
        *size = size.saturating_add(bytes.len() as u64);
    }
    Ok(())
}

/// Splits `paths` and collects every chunk.
///
/// # Errors
///
/// Returns the first error produced by [`Splitter`].
pub fn split_files(paths: &[PathBuf], options: SplitOptions) -> Result<Vec<Chunk>, JobError> {
    Splitter::new(paths, options)?.collect()
}
