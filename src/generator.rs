//! Random input generator.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use log;
use rand::Rng;

use crate::chunk::write_record;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Writes `record_count` random alphabetic records, one per line.
/// Record lengths are uniformly distributed in `1..=max_record_length`.
pub fn generate<W, R>(writer: &mut W, record_count: u64, max_record_length: usize, rng: &mut R) -> io::Result<()>
where
    W: Write,
    R: Rng,
{
    if max_record_length == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "maximum record length must be positive",
        ));
    }

    let mut record = String::with_capacity(max_record_length);
    for _ in 0..record_count {
        record.clear();
        let length = rng.gen_range(1..=max_record_length);
        record.extend((0..length).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char));
        write_record(writer, &record)?;
    }

    return Ok(());
}

/// Creates the file at `path` filled with random records.
pub fn generate_file(path: &Path, record_count: u64, max_record_length: usize) -> io::Result<()> {
    log::info!(
        "generating {} records of at most {} characters into {}",
        record_count,
        max_record_length,
        path.display()
    );

    let mut writer = io::BufWriter::new(fs::File::create(path)?);
    generate(&mut writer, record_count, max_record_length, &mut rand::thread_rng())?;
    writer.flush()?;

    return Ok(());
}

#[cfg(test)]
mod test {
    use std::io;

    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::*;

    use super::{generate, generate_file};
    use crate::chunk::RecordReader;

    #[rstest]
    #[case(0, 10)]
    #[case(100, 1)]
    #[case(500, 20)]
    fn test_generate(#[case] record_count: u64, #[case] max_record_length: usize) {
        let mut out = Vec::new();
        generate(&mut out, record_count, max_record_length, &mut StdRng::seed_from_u64(7)).unwrap();

        let records: io::Result<Vec<String>> = RecordReader::new(out.as_slice()).collect();
        let records = records.unwrap();

        assert_eq!(records.len() as u64, record_count);
        for record in records {
            assert!(record.len() >= 1 && record.len() <= max_record_length);
            assert!(record.bytes().all(|b| b.is_ascii_alphabetic()));
        }
    }

    #[test]
    fn test_generate_zero_length() {
        let err = generate(&mut Vec::<u8>::new(), 1, 0, &mut StdRng::seed_from_u64(7)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_generate_file() {
        let tmp_dir = tempfile::tempdir_in("./").unwrap();
        let path = tmp_dir.path().join("source.txt");

        generate_file(&path, 42, 8).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 42);
    }
}
