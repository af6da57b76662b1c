use std::ptr::NonNull;

use proptest::prelude::*;
use tagalloc::{ALIGNMENT, Allocator, HeapConfig, ReservedHeap};

#[derive(Debug, Clone)]
enum Op {
    Allocate(usize),
    Free(usize),
    Resize(usize, usize),
    ZeroAllocate(usize, usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1usize..600).prop_map(Op::Allocate),
        2 => any::<usize>().prop_map(Op::Free),
        2 => (any::<usize>(), 0usize..800).prop_map(|(i, size)| Op::Resize(i, size)),
        1 => (0usize..16, 0usize..64).prop_map(|(count, size)| Op::ZeroAllocate(count, size)),
    ]
}

struct Live {
    ptr: NonNull<u8>,
    size: usize,
    fill: u8,
}

fn contents(live: &Live) -> &[u8] {
    unsafe { std::slice::from_raw_parts(live.ptr.as_ptr(), live.size) }
}

fn fill(ptr: NonNull<u8>, size: usize, value: u8) {
    unsafe { ptr.as_ptr().write_bytes(value, size) }
}

fn check(allocator: &Allocator<ReservedHeap>, live: &[Live]) -> Result<(), TestCaseError> {
    let report = allocator.validate().map_err(|err| TestCaseError::fail(err.to_string()))?;

    prop_assert_eq!(report.allocated_blocks, live.len());
    prop_assert_eq!(report.free_blocks, allocator.free_blocks());

    for block in live {
        prop_assert_eq!(block.ptr.as_ptr() as usize % ALIGNMENT, 0);
        prop_assert!(contents(block).iter().all(|&b| b == block.fill));
        let usable = unsafe { allocator.usable_size(block.ptr) };
        prop_assert!(usable >= block.size);
    }

    let mut ranges: Vec<_> = live
        .iter()
        .map(|block| (block.ptr.as_ptr() as usize, block.size))
        .collect();
    ranges.sort_unstable();

    for pair in ranges.windows(2) {
        prop_assert!(pair[0].0 + pair[0].1 <= pair[1].0);
    }

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_sequences_keep_invariants(ops in prop::collection::vec(op(), 1..200)) {
        let config = HeapConfig::new().with_heap_checks(false);
        let mut allocator = Allocator::from_config(config).unwrap();
        let mut live: Vec<Live> = Vec::new();
        let mut counter = 0u8;

        for op in ops {
            counter = counter.wrapping_add(1);

            match op {
                Op::Allocate(size) => {
                    let ptr = allocator.allocate(size).unwrap();
                    fill(ptr, size, counter);
                    live.push(Live { ptr, size, fill: counter });
                }

                Op::Free(i) => {
                    if !live.is_empty() {
                        let block = live.swap_remove(i % live.len());
                        unsafe { allocator.free(Some(block.ptr)) };
                    }
                }

                Op::Resize(i, size) => {
                    if live.is_empty() {
                        continue;
                    }

                    let block = live.swap_remove(i % live.len());
                    let resized = unsafe { allocator.resize(Some(block.ptr), size) };

                    match resized {
                        Some(ptr) => {
                            let kept = block.size.min(size);
                            let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), kept) };
                            prop_assert!(bytes.iter().all(|&b| b == block.fill));

                            fill(ptr, size, counter);
                            live.push(Live { ptr, size, fill: counter });
                        }
                        None => prop_assert_eq!(size, 0),
                    }
                }

                Op::ZeroAllocate(count, size) => {
                    match allocator.zero_allocate(count, size) {
                        Some(ptr) => {
                            let total = count * size;
                            let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), total) };
                            prop_assert!(bytes.iter().all(|&b| b == 0));

                            fill(ptr, total, counter);
                            live.push(Live { ptr, size: total, fill: counter });
                        }
                        None => prop_assert_eq!(count * size, 0),
                    }
                }
            }

            check(&allocator, &live)?;
        }

        // Once everything is released the heap is a single free block again
        for block in live.drain(..) {
            unsafe { allocator.free(Some(block.ptr)) };
        }

        let report = allocator.validate().unwrap();
        prop_assert_eq!(report.allocated_blocks, 0);
        prop_assert_eq!(report.free_blocks, 1);
        prop_assert_eq!(report.free_bytes, report.largest_free);
    }
}
