//! Chunk buffers. A buffer collects records read from the source until it is full,
//! then the sorter sorts it and writes it out as a chunk file.

use rayon;

/// Buffer builder.
pub trait ChunkBufferBuilder: Default {
    type Buffer: ChunkBuffer;

    /// Creates a new empty buffer.
    fn build(&self) -> Self::Buffer;
}

/// Base limited record buffer interface.
pub trait ChunkBuffer: IntoIterator<Item = String> + rayon::slice::ParallelSliceMut<String> + Send {
    /// Adds a record to the buffer.
    fn push(&mut self, record: String);

    /// Returns number of buffered records.
    fn len(&self) -> usize;

    /// Checks if the buffer reached the limit.
    fn is_full(&self) -> bool;
}

/// Upper bound of records preallocated by [`LimitedBuffer::with_capacity`].
pub const MAX_PREALLOCATED_RECORDS: usize = 1 << 20;

/// Builds buffers holding at most `block_size` records.
pub struct LimitedBufferBuilder {
    block_size: usize,
    preallocate: bool,
}

impl LimitedBufferBuilder {
    /// A `block_size` of zero is treated as one.
    pub fn new(block_size: usize, preallocate: bool) -> Self {
        LimitedBufferBuilder {
            block_size: block_size.max(1),
            preallocate,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl ChunkBufferBuilder for LimitedBufferBuilder {
    type Buffer = LimitedBuffer;

    fn build(&self) -> Self::Buffer {
        if self.preallocate {
            LimitedBuffer::with_capacity(self.block_size)
        } else {
            LimitedBuffer::new(self.block_size)
        }
    }
}

impl Default for LimitedBufferBuilder {
    fn default() -> Self {
        LimitedBufferBuilder {
            block_size: usize::MAX,
            preallocate: false,
        }
    }
}

/// Buffer limited by records count.
pub struct LimitedBuffer {
    limit: usize,
    inner: Vec<String>,
}

impl LimitedBuffer {
    pub fn new(limit: usize) -> Self {
        LimitedBuffer {
            limit,
            inner: Vec::new(),
        }
    }

    /// Preallocates room for `limit` records, but never more than [`MAX_PREALLOCATED_RECORDS`].
    pub fn with_capacity(limit: usize) -> Self {
        LimitedBuffer {
            limit,
            inner: Vec::with_capacity(limit.min(MAX_PREALLOCATED_RECORDS)),
        }
    }
}

impl ChunkBuffer for LimitedBuffer {
    fn push(&mut self, record: String) {
        self.inner.push(record);
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn is_full(&self) -> bool {
        self.inner.len() >= self.limit
    }
}

impl IntoIterator for LimitedBuffer {
    type Item = String;
    type IntoIter = <Vec<String> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl rayon::slice::ParallelSliceMut<String> for LimitedBuffer {
    fn as_parallel_slice_mut(&mut self) -> &mut [String] {
        self.inner.as_mut_slice()
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{ChunkBuffer, ChunkBufferBuilder, LimitedBuffer, LimitedBufferBuilder, MAX_PREALLOCATED_RECORDS};

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn test_limited_buffer(#[case] preallocate: bool) {
        let builder = LimitedBufferBuilder::new(2, preallocate);
        let mut buffer = builder.build();

        buffer.push("d".to_string());
        assert_eq!(buffer.is_full(), false);
        buffer.push("b".to_string());
        assert_eq!(buffer.is_full(), true);
        assert_eq!(buffer.len(), 2);

        let data = Vec::from_iter(buffer);
        assert_eq!(data, vec!["d", "b"]);
    }

    #[test]
    fn test_zero_block_size_holds_one_record() {
        let builder = LimitedBufferBuilder::new(0, false);
        assert_eq!(builder.block_size(), 1);

        let mut buffer = builder.build();
        assert_eq!(buffer.is_full(), false);
        buffer.push("a".to_string());
        assert_eq!(buffer.is_full(), true);
    }

    #[rstest]
    #[case(usize::MAX)]
    #[case(MAX_PREALLOCATED_RECORDS + 1)]
    fn test_preallocation_is_capped(#[case] block_size: usize) {
        let mut buffer = LimitedBufferBuilder::new(block_size, true).build();
        assert!(buffer.inner.capacity() <= MAX_PREALLOCATED_RECORDS);

        buffer.push("a".to_string());
        assert_eq!(buffer.is_full(), false);
        assert!(LimitedBuffer::with_capacity(3).inner.capacity() >= 3);
    }
}

#[cfg(feature = "memory-limit")]
pub mod mem {
    use deepsize::DeepSizeOf;
    use rayon;

    use super::{ChunkBuffer, ChunkBufferBuilder};

    /// Builds buffers limited both by consumed memory and by records count.
    pub struct MemoryLimitedBufferBuilder {
        buffer_limit: u64,
        block_size: usize,
    }

    impl MemoryLimitedBufferBuilder {
        pub fn new(buffer_limit: u64, block_size: usize) -> Self {
            MemoryLimitedBufferBuilder {
                buffer_limit,
                block_size: block_size.max(1),
            }
        }
    }

    impl ChunkBufferBuilder for MemoryLimitedBufferBuilder {
        type Buffer = MemoryLimitedBuffer;

        fn build(&self) -> Self::Buffer {
            MemoryLimitedBuffer::new(self.buffer_limit, self.block_size)
        }
    }

    impl Default for MemoryLimitedBufferBuilder {
        fn default() -> Self {
            MemoryLimitedBufferBuilder {
                buffer_limit: u64::MAX,
                block_size: usize::MAX,
            }
        }
    }

    /// Buffer limited by consumed memory. Also never holds more than `block_size` records.
    pub struct MemoryLimitedBuffer {
        limit: u64,
        block_size: usize,
        current_size: u64,
        inner: Vec<String>,
    }

    impl MemoryLimitedBuffer {
        pub fn new(limit: u64, block_size: usize) -> Self {
            MemoryLimitedBuffer {
                limit,
                block_size,
                current_size: 0,
                inner: Vec::new(),
            }
        }

        pub fn mem_size(&self) -> u64 {
            self.current_size
        }
    }

    impl ChunkBuffer for MemoryLimitedBuffer {
        fn push(&mut self, record: String) {
            self.current_size += record.deep_size_of() as u64;
            self.inner.push(record);
        }

        fn len(&self) -> usize {
            self.inner.len()
        }

        fn is_full(&self) -> bool {
            self.current_size >= self.limit || self.inner.len() >= self.block_size
        }
    }

    impl IntoIterator for MemoryLimitedBuffer {
        type Item = String;
        type IntoIter = <Vec<String> as IntoIterator>::IntoIter;

        fn into_iter(self) -> Self::IntoIter {
            self.inner.into_iter()
        }
    }

    impl rayon::slice::ParallelSliceMut<String> for MemoryLimitedBuffer {
        fn as_parallel_slice_mut(&mut self) -> &mut [String] {
            self.inner.as_mut_slice()
        }
    }

    #[cfg(test)]
    mod test {
        use super::{ChunkBuffer, ChunkBufferBuilder, MemoryLimitedBufferBuilder};

        #[test]
        fn test_memory_limited_buffer() {
            let builder = MemoryLimitedBufferBuilder::new(60, 10);
            let mut buffer = builder.build();

            // 8 + 8 + 8 + 6 = 30 bytes
            buffer.push(String::from("hello!"));
            assert_eq!(buffer.mem_size(), 30);
            assert_eq!(buffer.is_full(), false);

            buffer.push(String::from("world!"));
            assert_eq!(buffer.mem_size(), 60);
            assert_eq!(buffer.is_full(), true);

            let actual_data = Vec::from_iter(buffer);
            assert_eq!(actual_data, vec!["hello!", "world!"]);
        }

        #[test]
        fn test_memory_limited_buffer_block_size() {
            let builder = MemoryLimitedBufferBuilder::new(u64::MAX, 2);
            let mut buffer = builder.build();

            buffer.push(String::from("a"));
            assert_eq!(buffer.is_full(), false);
            buffer.push(String::from("b"));
            assert_eq!(buffer.is_full(), true);
        }
    }
}
