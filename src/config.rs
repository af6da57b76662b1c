use crate::{
    block::{ALIGNMENT, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, SKELETON_SIZE},
    error::{AllocError, AllocResult},
    utils::is_aligned,
};

/// Default amount of bytes the heap grows by when no free block fits a request.
pub const CHUNK_SIZE: usize = 1 << 12;

/// Default amount of bytes [`crate::ReservedHeap`] reserves up front.
pub const MAX_HEAP_SIZE: usize = 20 * (1 << 20);

/// Tunables of an [`crate::Allocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Minimum number of bytes requested from the extender on every growth.
    pub chunk_size: usize,
    /// Capacity of the heap when it is backed by a [`crate::ReservedHeap`].
    pub max_heap_size: usize,
    /// Run the consistency checker after every mutating operation.
    pub check_heap: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapConfig {
    pub const fn new() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_heap_size: MAX_HEAP_SIZE,
            check_heap: cfg!(debug_assertions),
        }
    }

    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub const fn with_max_heap_size(mut self, max_heap_size: usize) -> Self {
        self.max_heap_size = max_heap_size;
        self
    }

    pub const fn with_heap_checks(mut self, check_heap: bool) -> Self {
        self.check_heap = check_heap;
        self
    }

    /// Checks that the configured sizes, the whole heap included, can be
    /// encoded in block tags and that the heap can hold at least the sentinels
    /// plus one chunk.
    pub fn validate(&self) -> AllocResult<()> {
        if !is_aligned(self.chunk_size, ALIGNMENT) {
            return Err(AllocError::InvalidConfig("chunk size must be a multiple of 8"));
        }

        if self.chunk_size < MIN_BLOCK_SIZE {
            return Err(AllocError::InvalidConfig("chunk size is smaller than a block"));
        }

        if self.chunk_size > MAX_BLOCK_SIZE {
            return Err(AllocError::InvalidConfig("chunk size does not fit in a block tag"));
        }

        if self.max_heap_size > MAX_BLOCK_SIZE {
            return Err(AllocError::InvalidConfig("max heap size does not fit in a block tag"));
        }

        if self.max_heap_size < SKELETON_SIZE + self.chunk_size {
            return Err(AllocError::InvalidConfig("max heap size cannot hold the first chunk"));
        }

        Ok(())
    }
}
