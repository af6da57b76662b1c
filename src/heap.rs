use std::{ops::Range, ptr::NonNull};

use log::debug;

use crate::{
    error::{AllocError, AllocResult},
    kernel::{page_size, request_memory, return_memory},
    utils::align,
};

/// Source of heap memory. The allocator owns exactly one of these and asks it
/// for more bytes whenever no free block fits a request.
///
/// # Safety
///
/// Implementors must hand out memory that is valid for reads and writes for
/// as long as the extender lives, that is not used by anything else, and each
/// call must return space that starts exactly where the previously returned
/// space ended. The first region must be 8 byte aligned.
pub unsafe trait HeapExtender {
    /// Appends `delta` bytes to the heap and returns the start of the new
    /// space, or `None` if the memory is not available. A failed call must not
    /// change the heap.
    fn grow_heap(&mut self, delta: usize) -> Option<NonNull<u8>>;
}

/// Heap backed by a single region reserved from the operating system up front.
///
/// The region is handed out monotonically, like a program break that can only
/// move up, until `limit` bytes are in use.
///
/// ```text
/// base                        brk                       limit
///  +---------------------------+--------------------------+
///  |        heap in use        |         reserved         |
///  +---------------------------+--------------------------+
/// ```
pub struct ReservedHeap {
    base: NonNull<u8>,
    /// Length of the mapping, a multiple of the page size.
    mapped: usize,
    /// Bytes that can be handed out.
    limit: usize,
    /// Bytes already handed out.
    brk: usize,
}

impl ReservedHeap {
    /// Reserves `limit` bytes (rounded up to whole pages) from the kernel.
    pub fn new(limit: usize) -> AllocResult<Self> {
        let mapped = align(limit.max(1), page_size()).ok_or(AllocError::OutOfMemory { requested: limit })?;

        let base = unsafe { request_memory(mapped) }.ok_or(AllocError::OutOfMemory { requested: mapped })?;

        debug!("Reserved {mapped} bytes for the heap at {base:p}");

        Ok(Self { base, mapped, limit, brk: 0 })
    }

    /// Bytes this heap is allowed to grow to.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.limit
    }

    /// Bytes handed out so far.
    #[inline]
    pub fn used(&self) -> usize {
        self.brk
    }

    /// Addresses covered by the reservation, whether handed out or not.
    pub(crate) fn span(&self) -> Range<usize> {
        let start = self.base.as_ptr() as usize;
        start..start + self.mapped
    }
}

unsafe impl HeapExtender for ReservedHeap {
    fn grow_heap(&mut self, delta: usize) -> Option<NonNull<u8>> {
        if delta > self.limit - self.brk {
            debug!("Heap limit reached: {} of {} bytes used, {delta} requested", self.brk, self.limit);
            return None;
        }

        let start = unsafe { self.base.add(self.brk) };
        self.brk += delta;

        Some(start)
    }
}

impl Drop for ReservedHeap {
    fn drop(&mut self) {
        unsafe { return_memory(self.base.as_ptr(), self.mapped) }
    }
}

// The reservation is owned exclusively by this value.
unsafe impl Send for ReservedHeap {}
