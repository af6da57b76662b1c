use std::{mem, ptr::{self, NonNull}};

/// Size of a header or footer word. Tags are packed in a `u32`.
pub(crate) const WORD_SIZE: usize = mem::size_of::<u32>();

/// Every block size and every payload address is a multiple of this.
pub const ALIGNMENT: usize = 8;

/// Bytes taken by the header plus the footer of a block.
pub const OVERHEAD: usize = 2 * WORD_SIZE;

/// Size of one free list link stored inside a free payload.
pub(crate) const LINK_SIZE: usize = mem::size_of::<*mut u8>();

/// Smallest block we can hand out: it has to be able to hold both tags and
/// the two free list links once it is released.
pub const MIN_BLOCK_SIZE: usize = (OVERHEAD + 2 * LINK_SIZE + ALIGNMENT - 1) & !(ALIGNMENT - 1);

/// Largest block size that can be encoded in a boundary tag.
pub const MAX_BLOCK_SIZE: usize = (u32::MAX as usize) & !(ALIGNMENT - 1);

/// The prologue is a permanently allocated block of minimum size.
pub(crate) const PROLOGUE_SIZE: usize = MIN_BLOCK_SIZE;

/// Bytes needed for the empty heap: alignment padding, prologue and epilogue.
pub const SKELETON_SIZE: usize = WORD_SIZE + PROLOGUE_SIZE + WORD_SIZE;

const ALLOCATED_BIT: u32 = 0x1;

const SIZE_MASK: u32 = !(ALIGNMENT as u32 - 1);

/// Boundary tag. Header and footer of every block are one of these, they
/// pack the block size (a multiple of 8) and the allocated flag in its low bit.
///
/// ```text
///  31                                  3   2   1   0
/// +--------------------------------------+---+---+---+
/// |          block size (bytes)          | 0 | 0 | a |
/// +--------------------------------------+---+---+---+
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Tag(u32);

impl Tag {
    /// Tag of the sentinel block at the start of the heap.
    pub const PROLOGUE: Tag = Tag(PROLOGUE_SIZE as u32 | ALLOCATED_BIT);

    /// Tag of the zero sized sentinel that marks the end of the heap.
    pub const EPILOGUE: Tag = Tag(ALLOCATED_BIT);

    /// Packs `size` and `allocated`. Sizes that are not a multiple of 8 or
    /// that don't fit in the tag word are rejected.
    pub const fn new(size: usize, allocated: bool) -> Option<Self> {
        if size % ALIGNMENT != 0 || size > MAX_BLOCK_SIZE {
            return None;
        }

        Some(Tag(size as u32 | allocated as u32))
    }

    /// Same as [`Tag::new`] for sizes the allocator already bounded by the
    /// heap size. Panics instead of writing a truncated word.
    pub const fn pack(size: usize, allocated: bool) -> Self {
        match Tag::new(size, allocated) {
            Some(tag) => tag,
            None => panic!("block size cannot be encoded in a boundary tag"),
        }
    }

    #[inline]
    pub const fn size(self) -> usize {
        (self.0 & SIZE_MASK) as usize
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & ALLOCATED_BIT != 0
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Handle to a block of the heap, represented by its payload address.
///
/// ```text
///            +---------------------+
///            |  header (size | a)  |  <- payload - 4
///  payload ->+---------------------+
///            |                     |
///            |       Payload       |
///            |         ...         |
///            +---------------------+
///            |  footer (size | a)  |  <- payload + size - 8
///            +---------------------+
///            |  next block header  |
///            +---------------------+
/// ```
///
/// There is no list of every block in the heap. Neighbours are found through
/// the sizes stored in the tags: the next block starts right after our footer,
/// and the footer of the previous block sits right before our header.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Block(NonNull<u8>);

impl Block {
    /// **SAFETY**: `payload` must be the payload address of a block inside a
    /// heap laid out by this allocator (the epilogue included), and the heap
    /// must outlive the handle.
    #[inline]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        Self(payload)
    }

    #[inline]
    pub fn payload(self) -> NonNull<u8> {
        self.0
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline]
    fn header_ptr(self) -> *mut u32 {
        unsafe { self.0.as_ptr().sub(WORD_SIZE).cast() }
    }

    #[inline]
    fn footer_ptr(self, size: usize) -> *mut u32 {
        unsafe { self.0.as_ptr().add(size).sub(OVERHEAD).cast() }
    }

    #[inline]
    pub fn header(self) -> Tag {
        unsafe { Tag(self.header_ptr().read()) }
    }

    /// Footer word as located by the size in the header.
    #[inline]
    pub fn footer(self) -> Tag {
        unsafe { Tag(self.footer_ptr(self.size()).read()) }
    }

    #[inline]
    pub fn size(self) -> usize {
        self.header().size()
    }

    /// Bytes the user can actually write.
    #[inline]
    pub fn payload_size(self) -> usize {
        self.size().saturating_sub(OVERHEAD)
    }

    #[inline]
    pub fn is_allocated(self) -> bool {
        self.header().is_allocated()
    }

    #[inline]
    pub fn is_epilogue(self) -> bool {
        self.size() == 0
    }

    #[inline]
    pub fn set_header(self, tag: Tag) {
        unsafe { self.header_ptr().write(tag.raw()) }
    }

    /// Writes `tag` as both header and footer. The footer is placed according
    /// to the new size, so this is also how blocks are resized.
    pub fn write_tags(self, tag: Tag) {
        self.set_header(tag);
        unsafe { self.footer_ptr(tag.size()).write(tag.raw()) }
    }

    /// Footer of the block right before this one.
    #[inline]
    pub fn prev_footer(self) -> Tag {
        unsafe { Tag(self.0.as_ptr().sub(OVERHEAD).cast::<u32>().read()) }
    }

    #[inline]
    pub fn next(self) -> Block {
        unsafe { Block(self.0.add(self.size())) }
    }

    #[inline]
    pub fn prev(self) -> Block {
        unsafe { Block(self.0.sub(self.prev_footer().size())) }
    }

    /// Gives access to the free list links, only if the block is free.
    #[inline]
    pub fn as_free(self) -> Option<FreeBlock> {
        (!self.is_allocated()).then_some(FreeBlock(self))
    }

    /// Tags this block as a free block of `size` bytes.
    #[inline]
    pub fn mark_free(self, size: usize) -> FreeBlock {
        self.write_tags(Tag::pack(size, false));
        FreeBlock(self)
    }

    /// Tags this block as an allocated block of `size` bytes.
    #[inline]
    pub fn mark_allocated(self, size: usize) {
        self.write_tags(Tag::pack(size, true));
    }
}

/// A block whose header says it is free. This is the only way to reach the
/// free list links, which overlay the first two words of the payload:
///
/// ```text
///            +---------------------+
///            |  header (size | 0)  |
///  payload ->+---------------------+
///            |  next free block    |
///            +---------------------+
///            |  prev free block    |
///            +---------------------+
///            |      (unused)       |
///            +---------------------+
///            |  footer (size | 0)  |
///            +---------------------+
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct FreeBlock(Block);

impl FreeBlock {
    #[inline]
    pub fn block(self) -> Block {
        self.0
    }

    #[inline]
    fn next_link(self) -> *mut *mut u8 {
        self.0.payload().as_ptr().cast()
    }

    #[inline]
    fn prev_link(self) -> *mut *mut u8 {
        unsafe { self.0.payload().as_ptr().add(LINK_SIZE).cast() }
    }

    pub fn next_free(self) -> Option<FreeBlock> {
        let raw = unsafe { self.next_link().read() };
        NonNull::new(raw).map(|payload| FreeBlock(Block(payload)))
    }

    pub fn prev_free(self) -> Option<FreeBlock> {
        let raw = unsafe { self.prev_link().read() };
        NonNull::new(raw).map(|payload| FreeBlock(Block(payload)))
    }

    pub fn set_next_free(self, next: Option<FreeBlock>) {
        unsafe { self.next_link().write(link_value(next)) }
    }

    pub fn set_prev_free(self, prev: Option<FreeBlock>) {
        unsafe { self.prev_link().write(link_value(prev)) }
    }
}

#[inline]
fn link_value(block: Option<FreeBlock>) -> *mut u8 {
    block.map_or(ptr::null_mut(), |free| free.block().payload().as_ptr())
}
