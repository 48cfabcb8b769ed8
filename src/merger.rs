//! Two-way merger.

use std::error::Error;
use std::io;
use std::io::prelude::*;

use log;

use crate::chunk::{write_record, WorkDir};

/// Two-way merger implementation.
/// Merges two sorted inputs into a single sorted output keeping duplicates.
/// When the heads of both inputs are equal the left one is returned first.
pub struct PairMerger<T, E, L, R>
where
    T: Ord,
    E: Error,
    L: Iterator<Item = Result<T, E>>,
    R: Iterator<Item = Result<T, E>>,
{
    left: L,
    right: R,
    left_head: Option<T>,
    right_head: Option<T>,
    initiated: bool,
    failed: bool,
}

impl<T, E, L, R> PairMerger<T, E, L, R>
where
    T: Ord,
    E: Error,
    L: Iterator<Item = Result<T, E>>,
    R: Iterator<Item = Result<T, E>>,
{
    /// Creates a merger of two inputs.
    /// Input items should be sorted in ascending order otherwise the result is undefined.
    pub fn new(left: impl IntoIterator<IntoIter = L>, right: impl IntoIterator<IntoIter = R>) -> Self {
        PairMerger {
            left: left.into_iter(),
            right: right.into_iter(),
            left_head: None,
            right_head: None,
            initiated: false,
            failed: false,
        }
    }
}

impl<T, E, L, R> Iterator for PairMerger<T, E, L, R>
where
    T: Ord,
    E: Error,
    L: Iterator<Item = Result<T, E>>,
    R: Iterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    /// Returns the next item from the inputs in ascending order.
    /// After an input error is returned the merger is exhausted.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if !self.initiated {
            let heads = self
                .left
                .next()
                .transpose()
                .and_then(|left| Ok((left, self.right.next().transpose()?)));
            match heads {
                Ok((left, right)) => {
                    self.left_head = left;
                    self.right_head = right;
                }
                Err(err) => return self.fail(err),
            }
            self.initiated = true;
        }

        let take_left = match (&self.left_head, &self.right_head) {
            (None, None) => return None,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(left), Some(right)) => left <= right,
        };

        let advanced = if take_left {
            advance(&mut self.left_head, &mut self.left)
        } else {
            advance(&mut self.right_head, &mut self.right)
        };

        match advanced {
            Ok(result) => result.map(Ok),
            Err(err) => self.fail(err),
        }
    }
}

impl<T, E, L, R> PairMerger<T, E, L, R>
where
    T: Ord,
    E: Error,
    L: Iterator<Item = Result<T, E>>,
    R: Iterator<Item = Result<T, E>>,
{
    fn fail(&mut self, err: E) -> Option<Result<T, E>> {
        self.failed = true;
        self.left_head = None;
        self.right_head = None;

        return Some(Err(err));
    }
}

/// Takes the current head and refills it from the input.
fn advance<T, E, I>(head: &mut Option<T>, input: &mut I) -> Result<Option<T>, E>
where
    I: Iterator<Item = Result<T, E>>,
{
    let result = head.take();
    *head = input.next().transpose()?;

    return Ok(result);
}

/// Merges chunks `left` and `right` into `temp-<dest>` and deletes both inputs.
/// The destination is left under its temporary name, see [`WorkDir::commit_temp`].
/// Returns the number of records written.
pub fn stage_pair(work_dir: &WorkDir, left: usize, right: usize, dest: usize) -> io::Result<u64> {
    log::debug!("merging chunks {} and {} into {}", left, right, dest);

    let count = {
        let left_reader = work_dir.open_chunk(left)?;
        let right_reader = work_dir.open_chunk(right)?;
        let mut writer = work_dir.create(&work_dir.temp_path(dest))?;

        let mut count = 0;
        for record in PairMerger::new(left_reader, right_reader) {
            write_record(&mut writer, &record?)?;
            count += 1;
        }
        writer.flush()?;

        count
    };

    work_dir.remove_chunk(left)?;
    work_dir.remove_chunk(right)?;

    return Ok(count);
}

/// Merges chunks `left` and `right` into chunk `dest`.
/// The output is written under a temporary name and renamed to `dest` only after both inputs have
/// been deleted, so `dest` may reuse one of the input indices.
/// Returns the number of records written.
pub fn merge_pair(work_dir: &WorkDir, left: usize, right: usize, dest: usize) -> io::Result<u64> {
    let count = stage_pair(work_dir, left, right, dest)?;
    work_dir.commit_temp(dest)?;

    return Ok(count);
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;
    use std::error::Error;
    use std::io::{self, ErrorKind};

    use rstest::*;

    use super::{merge_pair, PairMerger};
    use crate::chunk::WorkDir;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    #[rstest]
    #[case(vec![], vec![], vec![])]
    #[case(vec![Ok(1), Ok(4)], vec![], vec![Ok(1), Ok(4)])]
    #[case(vec![], vec![Ok(2), Ok(3)], vec![Ok(2), Ok(3)])]
    #[case(
        vec![Ok(4), Ok(5), Ok(7)],
        vec![Ok(1), Ok(3), Ok(6), Ok(8), Ok(9)],
        vec![Ok(1), Ok(3), Ok(4), Ok(5), Ok(6), Ok(7), Ok(8), Ok(9)],
    )]
    #[case(
        vec![Ok(1), Ok(1)],
        vec![Ok(1)],
        vec![Ok(1), Ok(1), Ok(1)],
    )]
    #[case(
        vec![Result::Err(io::Error::new(ErrorKind::Other, "test error"))],
        vec![Ok(1)],
        vec![Result::Err(io::Error::new(ErrorKind::Other, "test error"))],
    )]
    #[case(
        vec![Ok(3), Result::Err(io::Error::new(ErrorKind::Other, "test error"))],
        vec![Ok(1), Ok(2), Ok(4)],
        vec![
            Ok(1),
            Ok(2),
            Result::Err(io::Error::new(ErrorKind::Other, "test error")),
        ],
    )]
    fn test_merger(
        #[case] left: Vec<Result<i32, io::Error>>,
        #[case] right: Vec<Result<i32, io::Error>>,
        #[case] expected_result: Vec<Result<i32, io::Error>>,
    ) {
        let merger = PairMerger::new(left, right);
        let actual_result: Vec<_> = merger.take(expected_result.len() + 1).collect();
        assert!(
            compare_vectors_of_result::<_, io::Error>(&actual_result, &expected_result),
            "actual={:?}, expected={:?}",
            actual_result,
            expected_result
        );
    }

    #[derive(Debug, PartialEq, Eq)]
    struct Keyed(u8, &'static str);

    impl PartialOrd for Keyed {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }

    impl Ord for Keyed {
        fn cmp(&self, other: &Self) -> Ordering {
            self.0.cmp(&other.0)
        }
    }

    #[test]
    fn test_merger_left_first_on_ties() {
        let left: Vec<Result<Keyed, io::Error>> = vec![Ok(Keyed(1, "left")), Ok(Keyed(2, "left"))];
        let right: Vec<Result<Keyed, io::Error>> = vec![Ok(Keyed(1, "right")), Ok(Keyed(2, "right"))];

        let merged: Result<Vec<_>, _> = PairMerger::new(left, right).collect();
        assert_eq!(
            merged.unwrap(),
            vec![Keyed(1, "left"), Keyed(1, "right"), Keyed(2, "left"), Keyed(2, "right")]
        );
    }

    #[rstest]
    #[case(vec!["apple", "banana"], vec!["cherry", "date"], 1)]
    #[case(vec!["a", "a"], vec!["a"], 2)]
    #[case(vec!["b", "d", "f"], vec![], 1)]
    #[case(vec![], vec!["a", "c"], 1)]
    #[case(vec![], vec![], 2)]
    fn test_merge_pair(
        tmp_dir: tempfile::TempDir,
        #[case] left: Vec<&str>,
        #[case] right: Vec<&str>,
        #[case] dest: usize,
    ) {
        let work_dir = WorkDir::new(tmp_dir.path(), None);
        work_dir.write_chunk(1, left.iter().map(|s| s.to_string())).unwrap();
        work_dir.write_chunk(2, right.iter().map(|s| s.to_string())).unwrap();

        let count = merge_pair(&work_dir, 1, 2, dest).unwrap();

        let mut expected = Vec::from_iter(left.iter().chain(right.iter()).map(|s| s.to_string()));
        expected.sort();
        assert_eq!(count, expected.len() as u64);

        let actual: io::Result<Vec<String>> = work_dir.open_chunk(dest).unwrap().collect();
        assert_eq!(actual.unwrap(), expected);

        let other = if dest == 1 { 2 } else { 1 };
        assert!(!work_dir.chunk_path(other).exists());
        assert!(!work_dir.temp_path(dest).exists());
    }

    #[rstest]
    fn test_merge_pair_missing_input(tmp_dir: tempfile::TempDir) {
        let work_dir = WorkDir::new(tmp_dir.path(), None);
        work_dir.write_chunk(1, vec!["a".to_string()]).unwrap();

        let err = merge_pair(&work_dir, 1, 2, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(work_dir.chunk_path(1).exists());
    }

    fn compare_vectors_of_result<T: PartialEq, E: Error + 'static>(
        actual: &Vec<Result<T, E>>,
        expected: &Vec<Result<T, E>>,
    ) -> bool {
        actual.len() == expected.len()
            && actual
                .into_iter()
                .zip(expected)
                .all(
                    |(actual_result, expected_result)| match (actual_result, expected_result) {
                        (Ok(actual_result), Ok(expected_result)) if actual_result == expected_result => true,
                        (Err(actual_err), Err(expected_err)) => actual_err.to_string() == expected_err.to_string(),
                        _ => false,
                    },
                )
    }
}
