//! Process wide heap.
//!
//! A single [`Allocator`] over a [`ReservedHeap`] with the default
//! configuration, created the first time any of these functions is called and
//! kept until the process exits. The mutex only exists because a `static` has
//! to be `Sync`; the allocator itself is not meant to be shared between threads.
//!
//! The same heap can back the whole program through [`TagAlloc`]:
//!
//! ```rust,no_run
//! use tagalloc::global::TagAlloc;
//!
//! #[global_allocator]
//! static ALLOCATOR: TagAlloc = TagAlloc;
//!
//! fn main() {
//!     let numbers: Vec<u64> = (0..100).collect();
//!     assert_eq!(numbers.iter().sum::<u64>(), 4950);
//! }
//! ```

use std::{
    alloc::{GlobalAlloc, Layout, System},
    cell::Cell,
    ops::Range,
    ptr::NonNull,
    sync::{Mutex, OnceLock, PoisonError},
};

use log::warn;

use crate::{
    allocator::Allocator,
    block::ALIGNMENT,
    checker::HeapReport,
    error::AllocResult,
    heap::ReservedHeap,
};

static HEAP: Mutex<Option<Allocator<ReservedHeap>>> = Mutex::new(None);

/// Reservation behind [`HEAP`], known once the heap exists. It never moves.
static RESERVED: OnceLock<Range<usize>> = OnceLock::new();

thread_local! {
    /// Set while this thread is inside the heap.
    static IN_HEAP: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as inside the heap until dropped.
struct Entered;

impl Entered {
    fn new() -> Self {
        let _ = IN_HEAP.try_with(|flag| flag.set(true));
        Entered
    }
}

impl Drop for Entered {
    fn drop(&mut self) {
        let _ = IN_HEAP.try_with(|flag| flag.set(false));
    }
}

/// Threads whose locals are already gone count as inside the heap.
fn in_heap() -> bool {
    IN_HEAP.try_with(Cell::get).unwrap_or(true)
}

fn owns(ptr: *mut u8) -> bool {
    RESERVED
        .get()
        .is_some_and(|span| span.contains(&(ptr as usize)))
}

fn with_heap<T>(f: impl FnOnce(&mut Allocator<ReservedHeap>) -> AllocResult<T>) -> AllocResult<T> {
    let mut guard = HEAP.lock().unwrap_or_else(PoisonError::into_inner);
    let _entered = Entered::new();

    let allocator = match guard.take() {
        Some(allocator) => allocator,
        None => {
            let allocator = Allocator::new()?;
            let _ = RESERVED.set(allocator.extender().span());
            allocator
        }
    };

    f(guard.insert(allocator))
}

/// [`GlobalAlloc`] over the process wide heap.
///
/// Requests the heap can't serve fall back to [`System`]: alignments above
/// 8 bytes, an exhausted heap, and allocations made while the heap is busy on
/// the same thread (a logger formatting a message, for instance). Freed
/// pointers go back to whichever of the two handed them out. Blocks of the
/// heap released while it is busy on the same thread are leaked.
pub struct TagAlloc;

unsafe impl GlobalAlloc for TagAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= ALIGNMENT && !in_heap() {
            if let Ok(Some(ptr)) = with_heap(|heap| heap.try_allocate(layout.size())) {
                return ptr.as_ptr();
            }
        }

        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if !owns(ptr) {
            return unsafe { System.dealloc(ptr, layout) };
        }

        if !in_heap() {
            let _ = with_heap(|heap| {
                unsafe { heap.free(NonNull::new(ptr)) };
                Ok(())
            });
        }
    }
}

/// See [`Allocator::init`].
pub fn init() -> AllocResult<()> {
    with_heap(|heap| heap.init())
}

/// See [`Allocator::allocate`].
pub fn allocate(size: usize) -> Option<NonNull<u8>> {
    with_heap(|heap| heap.try_allocate(size)).unwrap_or_else(|err| {
        warn!("allocate({size}) failed: {err}");
        None
    })
}

/// See [`Allocator::free`].
///
/// # Safety
///
/// A present `ptr` must have been returned by this module.
pub unsafe fn free(ptr: Option<NonNull<u8>>) {
    if ptr.is_none() {
        return;
    }

    let freed = with_heap(|heap| {
        unsafe { heap.free(ptr) };
        Ok(())
    });

    if let Err(err) = freed {
        warn!("free({ptr:?}) ignored: {err}");
    }
}

/// See [`Allocator::resize`].
///
/// # Safety
///
/// A present `ptr` must have been returned by this module.
pub unsafe fn resize(ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
    with_heap(|heap| unsafe { heap.try_resize(ptr, size) }).unwrap_or_else(|err| {
        warn!("resize({ptr:?}, {size}) failed: {err}");
        None
    })
}

/// See [`Allocator::zero_allocate`].
pub fn zero_allocate(count: usize, size: usize) -> Option<NonNull<u8>> {
    with_heap(|heap| heap.try_zero_allocate(count, size)).unwrap_or_else(|err| {
        warn!("zero_allocate({count}, {size}) failed: {err}");
        None
    })
}

/// See [`Allocator::validate`].
pub fn validate() -> AllocResult<HeapReport> {
    with_heap(|heap| heap.validate())
}

/// See [`Allocator::check_heap`].
pub fn check_heap(verbose: bool) {
    let checked = with_heap(|heap| {
        heap.check_heap(verbose);
        Ok(())
    });

    if let Err(err) = checked {
        warn!("check_heap skipped: {err}");
    }
}
