//! Heap consistency checker.
//!
//! Walks every block from the prologue to the epilogue using the sizes in the
//! boundary tags, then walks the free list, and reports the first broken
//! invariant it finds. Nothing here mutates the heap.

use std::collections::HashSet;

use log::{error, info};

use crate::{
    allocator::{Allocator, Bounds},
    block::{ALIGNMENT, Block, FreeBlock, Tag},
    error::{AllocError, AllocResult},
    heap::HeapExtender,
    utils::is_aligned,
};

/// Summary of the heap produced by a successful check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapReport {
    /// Bytes between the start of the heap and its end, sentinels included.
    pub heap_size: usize,
    /// Blocks between the prologue and the epilogue.
    pub blocks: usize,
    pub allocated_blocks: usize,
    pub free_blocks: usize,
    /// Sum of the sizes of every free block, tags included.
    pub free_bytes: usize,
    pub largest_free: usize,
}

#[inline]
fn corrupt(block: Block, reason: &'static str) -> AllocError {
    AllocError::CorruptionDetected { addr: block.addr(), reason }
}

impl<E: HeapExtender> Allocator<E> {
    /// Checks every heap invariant and returns a summary of the heap. A heap
    /// that was never initialized is reported as empty.
    pub fn validate(&self) -> AllocResult<HeapReport> {
        self.inspect(false)
    }

    /// Checks the heap and panics on the first inconsistency, since carrying
    /// on with a corrupted heap only spreads the damage. With `verbose` every
    /// block is logged.
    pub fn check_heap(&self, verbose: bool) {
        match self.inspect(verbose) {
            Ok(report) => {
                if verbose {
                    info!("{report:?}");
                }
            }
            Err(err) => {
                error!("{err}");
                panic!("heap consistency check failed: {err}");
            }
        }
    }

    fn inspect(&self, verbose: bool) -> AllocResult<HeapReport> {
        let Some(bounds) = self.bounds else {
            return Ok(HeapReport::default());
        };

        if verbose {
            info!("Heap ({:p}): {} bytes", bounds.lo, bounds.size());
        }

        let mut report = HeapReport {
            heap_size: bounds.size(),
            ..HeapReport::default()
        };

        let prologue = bounds.prologue();
        if prologue.header() != Tag::PROLOGUE || prologue.footer() != Tag::PROLOGUE {
            return Err(corrupt(prologue, "bad prologue header"));
        }

        let end = bounds.hi.as_ptr() as usize;
        let mut block = prologue.next();
        let mut prev_free = false;

        loop {
            if !is_aligned(block.addr(), ALIGNMENT) {
                return Err(corrupt(block, "block is not double word aligned"));
            }

            if block.addr() > end {
                return Err(corrupt(block, "block starts past the heap end"));
            }

            if block.is_epilogue() {
                break;
            }

            let header = block.header();

            if header.size() > end - block.addr() {
                return Err(corrupt(block, "block runs past the heap end"));
            }

            if header != block.footer() {
                return Err(corrupt(block, "header does not match footer"));
            }

            if verbose {
                print_block(block);
            }

            report.blocks += 1;

            if header.is_allocated() {
                report.allocated_blocks += 1;
                prev_free = false;
            } else {
                if prev_free {
                    return Err(corrupt(block, "two adjacent free blocks were not coalesced"));
                }
                prev_free = true;
                report.free_blocks += 1;
                report.free_bytes += header.size();
                report.largest_free = report.largest_free.max(header.size());
            }

            block = block.next();
        }

        if verbose {
            info!("{:p}: EOL", block.payload());
        }

        if block != bounds.epilogue() {
            return Err(corrupt(block, "epilogue is not at the heap end"));
        }

        if block.header() != Tag::EPILOGUE {
            return Err(corrupt(block, "bad epilogue header"));
        }

        self.check_free_list(bounds, &report)?;

        Ok(report)
    }

    /// The free list must hold every free block of the heap exactly once,
    /// with consistent back links and nothing else.
    fn check_free_list(&self, bounds: Bounds, report: &HeapReport) -> AllocResult<()> {
        let mut seen = HashSet::new();
        let mut prev: Option<FreeBlock> = None;
        let mut current = self.free_list.head();
        let mut count = 0;

        while let Some(free) = current {
            let block = free.block();

            if count == report.free_blocks {
                return Err(corrupt(block, "free list holds more blocks than the heap"));
            }

            if !bounds.contains(block.payload()) {
                return Err(corrupt(block, "free list entry is outside the heap"));
            }

            if block.is_allocated() {
                return Err(corrupt(block, "allocated block on the free list"));
            }

            if free.prev_free() != prev {
                return Err(corrupt(block, "free list back link is broken"));
            }

            if !seen.insert(block.addr()) {
                return Err(corrupt(block, "block is on the free list twice"));
            }

            prev = Some(free);
            current = free.next_free();
            count += 1;
        }

        if count != report.free_blocks || count != self.free_list.len() {
            return Err(corrupt(bounds.prologue(), "free block missing from the free list"));
        }

        Ok(())
    }
}

fn print_block(block: Block) {
    let header = block.header();
    let footer = block.footer();
    let state = |tag: Tag| if tag.is_allocated() { 'a' } else { 'f' };

    info!(
        "{:p}: header: [{}:{}] footer: [{}:{}]",
        block.payload(),
        header.size(),
        state(header),
        footer.size(),
        state(footer),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::HeapConfig, heap::ReservedHeap};

    fn allocator() -> Allocator<ReservedHeap> {
        let _ = env_logger::builder().is_test(true).try_init();

        // Checks are run by hand so corruption can be planted between operations.
        Allocator::from_config(HeapConfig::new().with_heap_checks(false)).unwrap()
    }

    #[test]
    fn uninitialized_heap_is_empty() {
        let allocator = allocator();

        assert_eq!(allocator.validate(), Ok(HeapReport::default()));
        allocator.check_heap(true);
    }

    #[test]
    fn reports_blocks() {
        let mut allocator = allocator();

        let a = allocator.allocate(40).unwrap();
        let _b = allocator.allocate(40).unwrap();
        unsafe { allocator.free(Some(a)) };

        let report = allocator.validate().unwrap();
        assert_eq!(report.blocks, 3);
        assert_eq!(report.allocated_blocks, 1);
        assert_eq!(report.free_blocks, 2);
        assert_eq!(report.free_bytes, 4096 - 48);
        assert_eq!(report.largest_free, 4096 - 96);

        allocator.check_heap(true);
    }

    #[test]
    fn detects_mismatched_footer() {
        let mut allocator = allocator();
        let p = allocator.allocate(40).unwrap();

        let block = unsafe { Block::from_payload(p) };
        unsafe { p.as_ptr().add(40).cast::<u32>().write(Tag::pack(48, false).raw()) };

        assert_eq!(
            allocator.validate(),
            Err(AllocError::CorruptionDetected {
                addr: block.addr(),
                reason: "header does not match footer",
            })
        );
    }

    #[test]
    fn detects_uncoalesced_neighbours() {
        let mut allocator = allocator();
        let a = allocator.allocate(40).unwrap();
        let _b = allocator.allocate(40).unwrap();

        // Flip both blocks to free behind the allocator's back
        unsafe {
            let first = Block::from_payload(a);
            first.write_tags(Tag::pack(48, false));
            first.next().write_tags(Tag::pack(48, false));
        }

        assert!(matches!(
            allocator.validate(),
            Err(AllocError::CorruptionDetected { reason: "two adjacent free blocks were not coalesced", .. })
        ));
    }

    #[test]
    fn detects_free_block_missing_from_the_list() {
        let mut allocator = allocator();
        let a = allocator.allocate(40).unwrap();
        let _b = allocator.allocate(40).unwrap();

        unsafe { Block::from_payload(a).write_tags(Tag::pack(48, false)) };

        assert!(matches!(
            allocator.validate(),
            Err(AllocError::CorruptionDetected { reason: "free block missing from the free list", .. })
        ));
    }

    #[test]
    fn detects_allocated_block_on_the_list() {
        let mut allocator = allocator();
        let a = allocator.allocate(40).unwrap();
        let _b = allocator.allocate(40).unwrap();
        unsafe { allocator.free(Some(a)) };

        unsafe { Block::from_payload(a).write_tags(Tag::pack(48, true)) };

        assert!(matches!(
            allocator.validate(),
            Err(AllocError::CorruptionDetected { reason: "allocated block on the free list", .. })
        ));
    }

    #[test]
    fn detects_bad_epilogue() {
        let mut allocator = allocator();
        allocator.init().unwrap();

        let bounds = allocator.bounds.unwrap();
        bounds.epilogue().set_header(Tag::pack(0, false));

        assert!(matches!(
            allocator.validate(),
            Err(AllocError::CorruptionDetected { reason: "bad epilogue header", .. })
        ));
    }

    #[test]
    #[should_panic(expected = "heap consistency check failed")]
    fn check_heap_panics_on_corruption() {
        let mut allocator = allocator();
        allocator.init().unwrap();

        allocator.bounds.unwrap().prologue().set_header(Tag::pack(32, true));

        allocator.check_heap(false);
    }
}
