use std::{cmp, ptr::{self, NonNull}};

use log::{debug, error, trace, warn};

use crate::{
    block::{ALIGNMENT, Block, FreeBlock, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, OVERHEAD, SKELETON_SIZE, Tag},
    config::HeapConfig,
    error::{AllocError, AllocResult},
    freelist::FreeList,
    heap::{HeapExtender, ReservedHeap},
    utils::{align, is_aligned},
};

/// First and one-past-last byte of the heap.
///
/// ```text
/// lo                                                          hi
///  +-----+----------+---------+---------+-- ... --+-----------+
///  | pad | prologue | block 1 | block 2 |         | epilogue  |
///  +-----+----------+---------+---------+-- ... --+-----------+
/// ```
#[derive(Clone, Copy, Debug)]
pub(crate) struct Bounds {
    pub lo: NonNull<u8>,
    pub hi: NonNull<u8>,
}

impl Bounds {
    #[inline]
    pub fn size(self) -> usize {
        self.hi.as_ptr() as usize - self.lo.as_ptr() as usize
    }

    #[inline]
    pub fn prologue(self) -> Block {
        unsafe { Block::from_payload(self.lo.add(OVERHEAD)) }
    }

    /// The epilogue has no payload, its header is the last word of the heap.
    #[inline]
    pub fn epilogue(self) -> Block {
        unsafe { Block::from_payload(self.hi) }
    }

    /// Tells whether `payload` could be the payload of a block between the sentinels.
    pub fn contains(self, payload: NonNull<u8>) -> bool {
        let addr = payload.as_ptr() as usize;
        let first = self.lo.as_ptr() as usize + SKELETON_SIZE;

        is_aligned(addr, ALIGNMENT) && addr >= first && addr < self.hi.as_ptr() as usize
    }
}

/// Block size needed to serve `size` payload bytes, or `None` if it can't be
/// encoded in a tag.
pub(crate) fn adjusted_size(size: usize) -> Option<usize> {
    let total = align(size, ALIGNMENT)?.checked_add(OVERHEAD)?;
    let total = cmp::max(total, MIN_BLOCK_SIZE);

    (total <= MAX_BLOCK_SIZE).then_some(total)
}

/// Dynamic memory allocator over one contiguous heap that only grows.
///
/// Every block carries a boundary tag at both ends, and free blocks are kept
/// in an explicit doubly linked [`FreeList`] whose links live inside the free
/// blocks themselves:
///
/// ```text
///                                     Free List
///                +----------------------------------------------+
///                |                                              v
/// +-----+-----+------+-------+-------+------+-------+------+-----+
/// | pad | pro | Free | Block | Block | Free | Block | Free | epi |
/// +-----+-----+------+-------+-------+------+-------+------+-----+
///                                       ^                 |
///                                       +-----------------+
/// ```
///
/// The heap is created lazily by the first operation that needs it. All
/// operations take `&mut self`: the allocator has a single owner and no
/// internal synchronization.
pub struct Allocator<E: HeapExtender> {
    extender: E,
    config: HeapConfig,
    pub(crate) bounds: Option<Bounds>,
    pub(crate) free_list: FreeList,
}

// The allocator exclusively owns every byte its pointers refer to.
unsafe impl<E: HeapExtender + Send> Send for Allocator<E> {}

impl Allocator<ReservedHeap> {
    /// Allocator over a freshly reserved heap with the default configuration.
    pub fn new() -> AllocResult<Self> {
        Self::from_config(HeapConfig::default())
    }

    /// Allocator over a heap of `config.max_heap_size` bytes reserved from the OS.
    pub fn from_config(config: HeapConfig) -> AllocResult<Self> {
        config.validate()?;
        let heap = ReservedHeap::new(config.max_heap_size)?;

        Self::with_extender(heap, config)
    }
}

impl<E: HeapExtender> Allocator<E> {
    /// Allocator that will request its memory from `extender`. Nothing is
    /// requested until the heap is first needed.
    pub fn with_extender(extender: E, config: HeapConfig) -> AllocResult<Self> {
        config.validate()?;

        Ok(Self {
            extender,
            config,
            bounds: None,
            free_list: FreeList::new(),
        })
    }

    #[inline]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[inline]
    pub fn extender(&self) -> &E {
        &self.extender
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.bounds.is_some()
    }

    /// Number of blocks currently on the free list.
    #[inline]
    pub fn free_blocks(&self) -> usize {
        self.free_list.len()
    }

    /// Creates the heap if it doesn't exist yet. Calling it again is a no-op.
    pub fn init(&mut self) -> AllocResult<()> {
        self.heap().map(|_| ())
    }

    /// Returns the heap bounds, building the empty heap and seeding it with
    /// one chunk on first use.
    fn heap(&mut self) -> AllocResult<Bounds> {
        if let Some(bounds) = self.bounds {
            return Ok(bounds);
        }

        let lo = self
            .extender
            .grow_heap(SKELETON_SIZE)
            .ok_or(AllocError::OutOfMemory { requested: SKELETON_SIZE })?;

        if !is_aligned(lo.as_ptr() as usize, ALIGNMENT) {
            error!("Heap extender returned misaligned memory at {lo:p}");
            return Err(AllocError::Misaligned(lo.as_ptr() as usize));
        }

        let bounds = unsafe {
            // Alignment padding, so that every payload lands on a double word
            lo.as_ptr().cast::<u32>().write(0);

            let bounds = Bounds { lo, hi: lo.add(SKELETON_SIZE) };
            bounds.prologue().write_tags(Tag::PROLOGUE);
            bounds.epilogue().set_header(Tag::EPILOGUE);

            bounds
        };
        self.bounds = Some(bounds);

        debug!("Heap initialized at {lo:p}");

        // Extend the empty heap with a free block of `chunk_size` bytes
        self.extend_heap(bounds, self.config.chunk_size)?;

        Ok(self.bounds.unwrap_or(bounds))
    }

    /// Grows the heap by at least `bytes` and returns the new free block,
    /// already merged with a free block that was sitting at the old end.
    fn extend_heap(&mut self, bounds: Bounds, bytes: usize) -> AllocResult<FreeBlock> {
        let size = align(bytes, ALIGNMENT).ok_or(AllocError::OutOfMemory { requested: bytes })?;

        // No block, merged ones included, is larger than the heap, so the
        // whole heap must still fit in a tag after growing.
        bounds
            .size()
            .checked_add(size)
            .and_then(|total| Tag::new(total, false))
            .ok_or(AllocError::OutOfMemory { requested: size })?;

        let start = self
            .extender
            .grow_heap(size)
            .ok_or(AllocError::OutOfMemory { requested: size })?;

        if start != bounds.hi {
            error!("Heap extension at {start:p} does not start at heap end {:p}", bounds.hi);
            return Err(AllocError::NonContiguous {
                expected: bounds.hi.as_ptr() as usize,
                found: start.as_ptr() as usize,
            });
        }

        // The header of the new block overwrites the old epilogue, and the
        // new epilogue takes the last word of the new space.
        let block = unsafe { Block::from_payload(start) }.mark_free(size);
        block.block().next().set_header(Tag::EPILOGUE);

        let bounds = Bounds { lo: bounds.lo, hi: block.block().next().payload() };
        self.bounds = Some(bounds);

        debug!("Heap extended by {size} bytes, heap size is now {} bytes", bounds.size());

        let merged = self.coalesce(block);
        self.debug_check();

        Ok(merged)
    }

    /// Allocates `size` bytes. Returns `None` for zero sized requests and
    /// when the heap cannot grow enough, in which case the heap is unchanged.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.try_allocate(size).unwrap_or_else(|err| {
            warn!("allocate({size}) failed: {err}");
            None
        })
    }

    /// Same as [`Allocator::allocate`] but reports why the allocation failed.
    pub fn try_allocate(&mut self, size: usize) -> AllocResult<Option<NonNull<u8>>> {
        if size == 0 {
            return Ok(None);
        }

        let needed = adjusted_size(size).ok_or(AllocError::OutOfMemory { requested: size })?;
        let bounds = self.heap()?;

        let block = match self.free_list.find_fit(needed) {
            Some(block) => block,
            None => {
                let extend = cmp::max(needed, self.config.chunk_size);
                self.extend_heap(bounds, extend)?
            }
        };

        let payload = self.place(block, needed);
        trace!("allocate({size}) -> {payload:p}");
        self.debug_check();

        Ok(Some(payload))
    }

    /// Takes `block` off the free list and carves `size` bytes from its start.
    /// The rest goes back to the free list if it can stand as a block on its own.
    fn place(&mut self, block: FreeBlock, size: usize) -> NonNull<u8> {
        let available = block.block().size();
        self.free_list.remove(block);

        let block = block.block();

        if available - size >= MIN_BLOCK_SIZE {
            block.mark_allocated(size);
            let rest = block.next().mark_free(available - size);
            self.coalesce(rest);
        } else {
            block.mark_allocated(available);
        }

        block.payload()
    }

    /// Releases the block at `ptr`. Absent pointers, blocks that are already
    /// free and pointers that don't belong to this heap are ignored.
    ///
    /// # Safety
    ///
    /// A present `ptr` must have been returned by this allocator. Freeing a
    /// pointer whose block was merged or reused since is undefined behaviour.
    pub unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else {
            return;
        };

        let bounds = match self.heap() {
            Ok(bounds) => bounds,
            Err(err) => {
                warn!("free({ptr:p}) ignored, heap unavailable: {err}");
                return;
            }
        };

        if !bounds.contains(ptr) {
            warn!("free({ptr:p}) ignored, pointer is not in the heap");
            return;
        }

        let block = unsafe { Block::from_payload(ptr) };

        if !block.is_allocated() {
            trace!("free({ptr:p}) ignored, block is already free");
            return;
        }

        let free = block.mark_free(block.size());
        self.coalesce(free);

        trace!("free({ptr:p})");
        self.debug_check();
    }

    /// Merges `block` with its free neighbours and puts the result on the
    /// free list. The prologue and epilogue are allocated, so merging never
    /// crosses the heap bounds.
    fn coalesce(&mut self, block: FreeBlock) -> FreeBlock {
        let current = block.block();
        let prev = current.prev().as_free();
        let next = current.next().as_free();

        let merged = match (prev, next) {
            (None, None) => block,

            (None, Some(next)) => {
                self.free_list.remove(next);
                let size = current.size() + next.block().size();
                current.mark_free(size)
            }

            (Some(prev), None) => {
                self.free_list.remove(prev);
                let size = prev.block().size() + current.size();
                prev.block().mark_free(size)
            }

            (Some(prev), Some(next)) => {
                self.free_list.remove(prev);
                self.free_list.remove(next);
                let size = prev.block().size() + current.size() + next.block().size();
                prev.block().mark_free(size)
            }
        };

        self.free_list.insert(merged);

        merged
    }

    /// Moves the allocation at `ptr` to a new block of `size` bytes.
    ///
    /// A `size` of zero frees `ptr` and returns `None`. An absent `ptr` makes
    /// this a plain allocation. If the new block can't be allocated `None` is
    /// returned and `ptr` is left untouched.
    ///
    /// # Safety
    ///
    /// Same contract as [`Allocator::free`].
    pub unsafe fn resize(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        unsafe { self.try_resize(ptr, size) }.unwrap_or_else(|err| {
            warn!("resize({ptr:?}, {size}) failed: {err}");
            None
        })
    }

    /// Same as [`Allocator::resize`] but reports why the allocation failed.
    ///
    /// # Safety
    ///
    /// Same contract as [`Allocator::free`].
    pub unsafe fn try_resize(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> AllocResult<Option<NonNull<u8>>> {
        if size == 0 {
            unsafe { self.free(ptr) };
            return Ok(None);
        }

        let Some(old) = ptr else {
            return self.try_allocate(size);
        };

        let Some(new) = self.try_allocate(size)? else {
            return Ok(None);
        };

        unsafe {
            let old_size = Block::from_payload(old).payload_size();
            ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), cmp::min(old_size, size));
            self.free(Some(old));
        }

        trace!("resize({old:p}, {size}) -> {new:p}");

        Ok(Some(new))
    }

    /// Allocates room for `count` elements of `size` bytes, zero filled.
    /// Returns `None` if the total size overflows.
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        self.try_zero_allocate(count, size).unwrap_or_else(|err| {
            warn!("zero_allocate({count}, {size}) failed: {err}");
            None
        })
    }

    /// Same as [`Allocator::zero_allocate`] but reports why the allocation failed.
    pub fn try_zero_allocate(&mut self, count: usize, size: usize) -> AllocResult<Option<NonNull<u8>>> {
        let total = count
            .checked_mul(size)
            .ok_or(AllocError::OutOfMemory { requested: usize::MAX })?;

        let ptr = self.try_allocate(total)?;

        if let Some(ptr) = ptr {
            unsafe { ptr.as_ptr().write_bytes(0, total) };
        }

        Ok(ptr)
    }

    /// Bytes that can be written at `ptr`. This can be more than was asked
    /// for because of alignment and minimum block sizes.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this allocator.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe { Block::from_payload(ptr) }.payload_size()
    }

    #[inline]
    fn debug_check(&self) {
        if self.config.check_heap {
            self.check_heap(false);
        }
    }
}
