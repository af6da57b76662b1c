//! # tagalloc
//!
//! Dynamic memory allocator over a single contiguous heap that only grows at
//! its high end. Blocks carry boundary tags (a header and a footer word with
//! the block size and an allocated bit), free blocks are kept in an explicit
//! doubly linked list whose links live inside the free blocks, and adjacent
//! free blocks are always merged.
//!
//! ```text
//!   Heap:
//!
//!   lo                                                              hi
//!   +-----+----------+-----------+------------+-----------+----------+
//!   | pad | prologue |   Block   | Free Block |   Block   | epilogue |
//!   +-----+----------+-----------+------------+-----------+----------+
//!                                       ^
//!                                       |
//!                        free list head +
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::Allocator;
//!
//! let mut allocator = Allocator::new().unwrap();
//!
//! let ptr = allocator.allocate(64).unwrap();
//! unsafe {
//!     ptr.as_ptr().write_bytes(7, 64);
//!
//!     let bigger = allocator.resize(Some(ptr), 128).unwrap();
//!     assert_eq!(*bigger.as_ptr(), 7);
//!
//!     allocator.free(Some(bigger));
//! }
//!
//! allocator.check_heap(false);
//! ```
//!
//! ## Policy
//!
//! - Requests are served first-fit from the free list, which is kept in LIFO
//!   order, so recently freed blocks are tried first.
//! - When nothing fits, the heap grows by at least one chunk (4096 bytes by
//!   default) through a [`HeapExtender`].
//! - Resizing always moves the allocation to a new block.
//!
//! ## Limitations
//!
//! - **Single owner**: every operation takes `&mut self`.
//! - **No shrinking**: memory is never given back to the extender.
//! - **4 GiB heap**: a heap never grows past the largest block size a tag
//!   can encode ([`MAX_BLOCK_SIZE`]).

mod allocator;
mod block;
mod checker;
mod config;
mod error;
mod freelist;
pub mod global;
mod heap;
mod kernel;
mod utils;

pub use allocator::Allocator;
pub use block::{ALIGNMENT, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, OVERHEAD, SKELETON_SIZE};
pub use checker::HeapReport;
pub use config::{CHUNK_SIZE, HeapConfig, MAX_HEAP_SIZE};
pub use error::{AllocError, AllocResult};
pub use heap::{HeapExtender, ReservedHeap};
