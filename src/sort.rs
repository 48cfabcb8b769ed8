//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::Path;
use std::time::Instant;

use rayon::prelude::*;

use crate::chunk::WorkDir;
use crate::merger::stage_pair;
use crate::{ChunkBuffer, ChunkBufferBuilder, LimitedBufferBuilder};

/// Sorting error.
#[derive(Debug)]
pub enum SortError<I: Error> {
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Common I/O error.
    IO(io::Error),
    /// Input data stream error.
    InputError(I),
    /// Input record that can't be stored as a line.
    MalformedRecord {
        /// 1-based position of the record in the input.
        record: u64,
        reason: MalformedReason,
    },
}

/// Reason an input record was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    /// Record contains a line separator.
    EmbeddedNewline,
    /// Record is longer than the configured limit.
    TooLong { length: usize, limit: usize },
}

impl<I> Error for SortError<I>
where
    I: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::IO(err) => Some(err),
            SortError::InputError(err) => Some(err),
            SortError::MalformedRecord { .. } => None,
        }
    }
}

impl<I: Error> Display for SortError<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::InputError(err) => write!(f, "input data stream error: {}", err),
            SortError::MalformedRecord { record, reason } => write!(f, "malformed record #{}: {}", record, reason),
        }
    }
}

impl Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            MalformedReason::EmbeddedNewline => write!(f, "record contains a newline"),
            MalformedReason::TooLong { length, limit } => {
                write!(f, "record length {} exceeds the limit of {} bytes", length, limit)
            }
        }
    }
}

/// Terminal state of a finished sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOutcome {
    /// The input held no records; an empty result was published.
    Empty,
    /// The input was split into `chunks` chunk files merged in `rounds` rounds.
    Sorted { chunks: usize, rounds: usize },
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<E, B = LimitedBufferBuilder>
where
    E: Error,
    B: ChunkBufferBuilder,
{
    /// Number of threads to be used to sort chunks and merge pairs in parallel.
    threads_number: Option<usize>,
    /// Directory the working directory is created in.
    tmp_dir: Option<Box<Path>>,
    /// Chunk file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Maximum accepted record length in bytes.
    max_record_length: Option<usize>,
    /// Chunk buffer builder.
    buffer_builder: B,

    /// Input error type.
    input_error_type: PhantomData<E>,
}

impl<E, B> ExternalSorterBuilder<E, B>
where
    E: Error,
    B: ChunkBufferBuilder,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<E, B>, SortError<E>> {
        ExternalSorter::new(
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.buffer_builder,
            self.rw_buf_size,
            self.max_record_length,
        )
    }

    /// Sets number of threads to be used to sort data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<E, B> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<E, B> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets buffer builder.
    pub fn with_buffer(mut self, buffer_builder: B) -> ExternalSorterBuilder<E, B> {
        self.buffer_builder = buffer_builder;
        return self;
    }

    /// Sets chunk read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<E, B> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Rejects input records longer than `max_record_length` bytes.
    pub fn with_max_record_length(mut self, max_record_length: usize) -> ExternalSorterBuilder<E, B> {
        self.max_record_length = Some(max_record_length);
        return self;
    }
}

impl<E, B> Default for ExternalSorterBuilder<E, B>
where
    E: Error,
    B: ChunkBufferBuilder,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            max_record_length: None,
            buffer_builder: B::default(),
            input_error_type: PhantomData,
        }
    }
}

/// External sorter.
pub struct ExternalSorter<E, B = LimitedBufferBuilder>
where
    E: Error,
    B: ChunkBufferBuilder,
{
    /// Sorting and merging thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory holding the chunk files.
    tmp_dir: tempfile::TempDir,
    /// Chunk buffer builder.
    buffer_builder: B,
    /// Chunk file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Maximum accepted record length in bytes.
    max_record_length: Option<usize>,

    /// Input error type.
    input_error_type: PhantomData<E>,
}

impl<E, B> ExternalSorter<E, B>
where
    E: Error,
    B: ChunkBufferBuilder,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort and merge data in parallel. If the parameter is
    ///   [`None`] threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory the working directory is created in. If parameter is [`None`] default OS
    ///   temporary directory will be used.
    /// * `buffer_builder` - An instance of a buffer builder that will be used for chunk buffer creation.
    /// * `rw_buf_size` - Chunks file read/write buffer size.
    /// * `max_record_length` - Maximum accepted record length in bytes. If [`None`] records are not limited.
    pub fn new(
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        buffer_builder: B,
        rw_buf_size: Option<usize>,
        max_record_length: Option<usize>,
    ) -> Result<Self, SortError<E>> {
        return Ok(ExternalSorter {
            rw_buf_size,
            buffer_builder,
            max_record_length,
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: Self::init_tmp_directory(tmp_path)?,
            input_error_type: PhantomData,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError<E>> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<tempfile::TempDir, SortError<E>> {
        let tmp_dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }
        .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a working directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Directory the per-run working directories are created in.
    pub fn tmp_path(&self) -> &Path {
        self.tmp_dir.path()
    }

    /// Creates a fresh working directory for a single sort run.
    pub fn create_run_dir(&self) -> Result<tempfile::TempDir, SortError<E>> {
        tempfile::tempdir_in(self.tmp_dir.path()).map_err(|err| SortError::TempDir(err))
    }

    /// Chunk files view of the working directory at `path`.
    pub fn work_dir<'a>(&self, path: &'a Path) -> WorkDir<'a> {
        WorkDir::new(path, self.rw_buf_size)
    }

    /// Sorts records from the input and publishes the result at `output`.
    /// Every call works in its own directory, so a sorter can run several sorts at once.
    /// Nothing is written to `output` if sorting fails; the intermediate chunk files of the failed
    /// run stay under [`ExternalSorter::tmp_path`] until the sorter is dropped.
    ///
    /// # Arguments
    /// * `input` - Input stream records to be fetched from
    /// * `output` - Result file path
    pub fn sort<I>(&self, input: I, output: &Path) -> Result<SortOutcome, SortError<E>>
    where
        I: IntoIterator<Item = Result<String, E>>,
    {
        let run_dir = self.create_run_dir()?;
        log::debug!("sorting in {}", run_dir.path().display());

        match self.sort_in(&self.work_dir(run_dir.path()), input, output) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let path = run_dir.into_path();
                log::warn!("sorting failed, intermediate chunk files are left in {}", path.display());
                Err(err)
            }
        }
    }

    fn sort_in<I>(&self, work_dir: &WorkDir, input: I, output: &Path) -> Result<SortOutcome, SortError<E>>
    where
        I: IntoIterator<Item = Result<String, E>>,
    {
        let started = Instant::now();

        let chunks = self.partition(work_dir, input)?;
        if chunks == 0 {
            log::info!("input is empty, publishing an empty result");
            publish_empty(output).map_err(SortError::IO)?;
            return Ok(SortOutcome::Empty);
        }

        let mut files = chunks;
        let mut rounds = 0;
        while files > 1 {
            files = self.merge_round(work_dir, files)?;
            rounds += 1;
        }

        publish(&work_dir.chunk_path(1), output).map_err(SortError::IO)?;
        log::info!(
            "sorted {} chunks in {} rounds ({} ms)",
            chunks,
            rounds,
            started.elapsed().as_millis()
        );

        return Ok(SortOutcome::Sorted { chunks, rounds });
    }

    /// Splits the input into sorted chunk files `1..=n` in `work_dir` and returns `n`.
    /// No chunk holds more records than the buffer limit; an empty input produces no chunks.
    ///
    /// # Arguments
    /// * `work_dir` - Directory the chunk files are written to
    /// * `input` - Input stream records to be fetched from
    pub fn partition<I>(&self, work_dir: &WorkDir, input: I) -> Result<usize, SortError<E>>
    where
        I: IntoIterator<Item = Result<String, E>>,
    {
        let mut chunk_buf = self.buffer_builder.build();
        let mut chunks = 0;

        for (position, record) in input.into_iter().enumerate() {
            let record = record.map_err(SortError::InputError)?;
            self.validate(position as u64 + 1, &record)?;
            chunk_buf.push(record);

            if chunk_buf.is_full() {
                chunks += 1;
                self.create_chunk(work_dir, chunks, chunk_buf)?;
                chunk_buf = self.buffer_builder.build();
            }
        }

        if chunk_buf.len() > 0 {
            chunks += 1;
            self.create_chunk(work_dir, chunks, chunk_buf)?;
        }

        log::info!("input partitioned into {} chunks", chunks);

        return Ok(chunks);
    }

    /// Runs one merge round over chunk files `1..=files` of `work_dir`.
    /// Pairs `(2k-1, 2k)` are merged into chunk `k`; an odd last chunk is carried over as chunk
    /// `ceil(files/2)`. Returns the number of chunk files left.
    pub fn merge_round(&self, work_dir: &WorkDir, files: usize) -> Result<usize, SortError<E>> {
        let pairs = files / 2;
        log::info!("merging {} chunks ({} pairs)", files, pairs);

        // every merge only writes its own temp-<k> file so merges of a round can't clobber each
        // other's inputs; outputs are renamed once all of them are done
        let counts: io::Result<Vec<u64>> = self.thread_pool.install(|| {
            (1..=pairs)
                .into_par_iter()
                .map(|dest| stage_pair(work_dir, 2 * dest - 1, 2 * dest, dest))
                .collect()
        });
        let records: u64 = counts.map_err(SortError::IO)?.into_iter().sum();

        for dest in 1..=pairs {
            work_dir.commit_temp(dest).map_err(SortError::IO)?;
        }

        let mut remaining = pairs;
        if files % 2 == 1 {
            remaining += 1;
            log::debug!("carrying chunk {} over as {}", files, remaining);
            work_dir.rename_chunk(files, remaining).map_err(SortError::IO)?;
        }

        log::debug!("round merged {} records, {} chunks left", records, remaining);

        return Ok(remaining);
    }

    fn validate(&self, position: u64, record: &str) -> Result<(), SortError<E>> {
        let reason = if record.contains('\n') {
            Some(MalformedReason::EmbeddedNewline)
        } else {
            match self.max_record_length {
                Some(limit) if record.len() > limit => Some(MalformedReason::TooLong {
                    length: record.len(),
                    limit,
                }),
                _ => None,
            }
        };

        match reason {
            Some(reason) => Err(SortError::MalformedRecord {
                record: position,
                reason,
            }),
            None => Ok(()),
        }
    }

    fn create_chunk(&self, work_dir: &WorkDir, index: usize, mut buffer: B::Buffer) -> Result<(), SortError<E>> {
        log::debug!("sorting chunk {} data ({} records) ...", index, buffer.len());
        self.thread_pool.install(|| {
            buffer.par_sort_unstable();
        });

        log::debug!("saving chunk {} data", index);
        work_dir.write_chunk(index, buffer).map_err(SortError::IO)?;

        return Ok(());
    }
}

/// Moves the final chunk to `output`. Falls back to [`copy_publish`] when the rename fails, e.g.
/// because the working directory is on another file system.
fn publish(chunk: &Path, output: &Path) -> io::Result<()> {
    if let Err(err) = fs::rename(chunk, output) {
        log::debug!("result rename failed ({}), copying instead", err);
        copy_publish(chunk, output)?;
    }

    return Ok(());
}

/// Copies `chunk` into a temporary file next to `output` and persists it as `output`.
/// `output` is either complete or untouched. The chunk is removed once the result is in place.
fn copy_publish(chunk: &Path, output: &Path) -> io::Result<()> {
    let mut tmp_file = tempfile::NamedTempFile::new_in(parent_dir(output))?;
    io::copy(&mut fs::File::open(chunk)?, tmp_file.as_file_mut())?;
    tmp_file.persist(output).map_err(|err| err.error)?;

    if let Err(err) = fs::remove_file(chunk) {
        log::warn!("result published but {} not removed: {}", chunk.display(), err);
    }

    return Ok(());
}

fn publish_empty(output: &Path) -> io::Result<()> {
    tempfile::NamedTempFile::new_in(parent_dir(output))?
        .persist(output)
        .map_err(|err| err.error)?;

    return Ok(());
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
