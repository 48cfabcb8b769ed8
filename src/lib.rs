//! `line-ext-sort` sorts line-oriented text files that do not fit into memory.
//!
//! Sorting is done by an external (disk-based) merge sort in two phases. During the partition phase the input
//! is read as a stream of records (one record per line), collected into bounded in-memory buffers, and every
//! buffer is sorted and written out as a numbered chunk file. During the merge phase chunk files are merged
//! pairwise, round after round, until a single sorted file remains; that file is published as the result.
//! For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Bounded memory:**
//!   a chunk never holds more than the configured number of records. With the `memory-limit` feature
//!   chunks can additionally be limited by consumed memory.
//! * **Multithreading support:**
//!   chunks are sorted in parallel and all pair merges of a round run concurrently.
//! * **Safe publishing:**
//!   merge outputs are written under temporary names and renamed only when complete, so neither the next
//!   round nor the result path ever sees a partially written file.
//!
//! Records are compared as strings (byte-wise lexicographic order) and duplicates are preserved.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io;
//! use std::path;
//!
//! use line_ext_sort::{ExternalSorter, ExternalSorterBuilder, LimitedBufferBuilder, RecordReader};
//!
//! fn main() {
//!     let input_reader = io::BufReader::new(fs::File::open("input.txt").unwrap());
//!
//!     let sorter: ExternalSorter<io::Error> = ExternalSorterBuilder::new()
//!         .with_tmp_dir(path::Path::new("./"))
//!         .with_buffer(LimitedBufferBuilder::new(200_000, true))
//!         .build()
//!         .unwrap();
//!
//!     sorter
//!         .sort(RecordReader::new(input_reader), path::Path::new("result.txt"))
//!         .unwrap();
//! }
//! ```

pub mod buffer;
pub mod chunk;
pub mod generator;
pub mod merger;
pub mod sort;

pub use buffer::{ChunkBuffer, ChunkBufferBuilder, LimitedBuffer, LimitedBufferBuilder};
pub use chunk::{RecordReader, WorkDir};
pub use merger::{merge_pair, PairMerger};
pub use sort::{ExternalSorter, ExternalSorterBuilder, MalformedReason, SortError, SortOutcome};
