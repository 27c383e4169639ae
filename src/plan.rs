// src/plan.rs

/// A contiguous byte range of a file, the unit of parallel transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
}

impl ChunkRange {
    /// Offset one past the last byte of this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Value for an HTTP `Range` header covering this chunk.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.offset, self.end().saturating_sub(1))
    }
}

/// Splits a file of `file_size` bytes into `chunk_size` pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    /// A `chunk_size` of zero is treated as one byte.
    pub fn new(file_size: u64, chunk_size: u64) -> Self {
        Self {
            file_size,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> usize {
        self.file_size.div_ceil(self.chunk_size) as usize
    }

    /// Returns the range for `index`, or `None` past the last chunk.
    pub fn chunk(&self, index: usize) -> Option<ChunkRange> {
        if index >= self.total_chunks() {
            return None;
        }
        let offset = index as u64 * self.chunk_size;
        let length = self.chunk_size.min(self.file_size - offset);
        Some(ChunkRange { index, offset, length })
    }

    pub fn iter(&self) -> impl Iterator<Item = ChunkRange> + '_ {
        (0..self.total_chunks()).filter_map(move |i| self.chunk(i))
    }
}
