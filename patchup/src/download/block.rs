//! Block planning for concurrent downloads.

use std::fmt;

/// Inclusive byte range `[start, end]` of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Create a range covering `start..=end`.
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; a range covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value of the HTTP `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// One unit of work for a block worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTask {
    pub index: usize,
    pub range: ByteRange,
}

/// Partition `[0, length)` into blocks of `block_size` bytes.
///
/// The final block is truncated to the remainder. A zero length yields no
/// blocks.
pub fn plan_blocks(length: u64, block_size: u64) -> Vec<BlockTask> {
    if length == 0 || block_size == 0 {
        return Vec::new();
    }

    let count = length.div_ceil(block_size);
    (0..count)
        .map(|i| {
            let start = i * block_size;
            let end = (start + block_size).min(length) - 1;
            BlockTask {
                index: i as usize,
                range: ByteRange::new(start, end),
            }
        })
        .collect()
}

/// Copy buffer size for a stream of the given length.
pub fn buffer_size_for(length: u64) -> usize {
    const MIB: u64 = 1024 * 1024;
    match length {
        l if l < MIB => 8 * 1024,
        l if l < 16 * MIB => 32 * 1024,
        l if l < 256 * MIB => 64 * 1024,
        _ => 128 * 1024,
    }
}
