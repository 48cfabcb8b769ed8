//! Chunk files and the working directory they live in.
//!
//! A chunk file is a sequence of records in ascending order, one record per line, stored as
//! `<index>.txt`. A merge in progress writes to `temp-<index>.txt` and is renamed to its final
//! index only once the file is complete.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

pub const CHUNK_EXTENSION: &str = "txt";
pub const TEMP_PREFIX: &str = "temp-";

/// Reads newline-separated records.
///
/// Only the trailing `\n` is stripped, so a `\r` stays part of the record. The last line is a
/// record even if it is not terminated. Lines that are not valid UTF-8 are reported as
/// [`io::ErrorKind::InvalidData`] errors.
pub struct RecordReader<R> {
    reader: R,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        RecordReader { reader }
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                if line.ends_with('\n') {
                    line.pop();
                }
                Some(Ok(line))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

/// Writes a single record followed by a newline.
pub fn write_record<W: Write>(writer: &mut W, record: &str) -> io::Result<()> {
    writer.write_all(record.as_bytes())?;
    writer.write_all(b"\n")
}

/// Writes records one per line. Returns the number of records written.
pub fn write_records<W, I>(writer: &mut W, records: I) -> io::Result<u64>
where
    W: Write,
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut count = 0;
    for record in records {
        write_record(writer, record.as_ref())?;
        count += 1;
    }

    return Ok(count);
}

/// Working directory holding the chunk files of the current round.
#[derive(Clone, Copy)]
pub struct WorkDir<'a> {
    path: &'a Path,
    rw_buf_size: Option<usize>,
}

impl<'a> WorkDir<'a> {
    /// # Arguments
    /// * `path` - Directory the chunk files are stored in
    /// * `rw_buf_size` - Chunk file read/write buffer size. If [`None`] the std default is used.
    pub fn new(path: &'a Path, rw_buf_size: Option<usize>) -> Self {
        WorkDir { path, rw_buf_size }
    }

    pub fn path(&self) -> &Path {
        self.path
    }

    /// Path of the chunk file with the provided index.
    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.path.join(format!("{}.{}", index, CHUNK_EXTENSION))
    }

    /// Path of the in-flight merge destination for the provided index.
    pub fn temp_path(&self, index: usize) -> PathBuf {
        self.path.join(format!("{}{}.{}", TEMP_PREFIX, index, CHUNK_EXTENSION))
    }

    /// Writes `records` to the chunk file `index`. The records must already be sorted.
    /// Returns the number of records written.
    pub fn write_chunk(&self, index: usize, records: impl IntoIterator<Item = String>) -> io::Result<u64> {
        let mut writer = self.create(&self.chunk_path(index))?;
        let count = write_records(&mut writer, records)?;
        writer.flush()?;

        return Ok(count);
    }

    /// Opens the chunk file `index` for reading.
    pub fn open_chunk(&self, index: usize) -> io::Result<RecordReader<io::BufReader<fs::File>>> {
        let file = fs::File::open(self.chunk_path(index))?;
        let reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        return Ok(RecordReader::new(reader));
    }

    /// Creates a buffered writer for the file at `path`, truncating it if it exists.
    pub fn create(&self, path: &Path) -> io::Result<io::BufWriter<fs::File>> {
        let file = fs::File::create(path)?;
        let writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        return Ok(writer);
    }

    /// Relabels chunk `from` as chunk `to`.
    pub fn rename_chunk(&self, from: usize, to: usize) -> io::Result<()> {
        if from != to {
            fs::rename(self.chunk_path(from), self.chunk_path(to))?;
        }

        return Ok(());
    }

    /// Moves the completed merge destination `index` to its chunk name.
    pub fn commit_temp(&self, index: usize) -> io::Result<()> {
        fs::rename(self.temp_path(index), self.chunk_path(index))
    }

    pub fn remove_chunk(&self, index: usize) -> io::Result<()> {
        fs::remove_file(self.chunk_path(index))
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::{write_records, RecordReader, WorkDir};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    #[rstest]
    #[case(b"", vec![])]
    #[case(b"a\nb\n", vec!["a", "b"])]
    #[case(b"a\nb", vec!["a", "b"])]
    #[case(b"\n\nx\n", vec!["", "", "x"])]
    #[case(b"crlf\r\nnext\n", vec!["crlf\r", "next"])]
    fn test_record_reader(#[case] input: &[u8], #[case] expected: Vec<&str>) {
        let records: io::Result<Vec<String>> = RecordReader::new(input).collect();
        assert_eq!(records.unwrap(), expected);
    }

    #[test]
    fn test_record_reader_invalid_utf8() {
        let input: &[u8] = b"ok\n\xff\xfe\n";
        let mut reader = RecordReader::new(input);

        assert_eq!(reader.next().unwrap().unwrap(), "ok");
        let err = reader.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_write_records() {
        let mut out = Vec::new();
        let count = write_records(&mut out, vec!["b", "", "d"]).unwrap();

        assert_eq!(count, 3);
        assert_eq!(out, b"b\n\nd\n");
    }

    #[rstest]
    fn test_chunk_lifecycle(tmp_dir: tempfile::TempDir) {
        let work_dir = WorkDir::new(tmp_dir.path(), Some(16));
        let saved = vec!["apple".to_string(), "banana".to_string()];

        let count = work_dir.write_chunk(3, saved.clone()).unwrap();
        assert_eq!(count, 2);
        assert!(work_dir.chunk_path(3).ends_with("3.txt"));
        assert!(work_dir.temp_path(3).ends_with("temp-3.txt"));

        work_dir.rename_chunk(3, 1).unwrap();
        assert!(!work_dir.chunk_path(3).exists());

        let restored: io::Result<Vec<String>> = work_dir.open_chunk(1).unwrap().collect();
        assert_eq!(restored.unwrap(), saved);

        work_dir.remove_chunk(1).unwrap();
        assert!(work_dir.open_chunk(1).is_err());
    }
}
