//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// This method is used to round requested payloads up to [`crate::block::ALIGNMENT`]
/// and the reserved heap up to the computer's page size.
///
/// Returns `None` if rounding up would overflow `usize`.
pub fn align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    debug_assert!(aligment.is_power_of_two());

    to_be_aligned
        .checked_add(aligment - 1)
        .map(|value| value & !(aligment - 1))
}

/// Tells whether `addr` is a multiple of `aligment`.
#[inline]
pub fn is_aligned(addr: usize, aligment: usize) -> bool {
    addr & (aligment - 1) == 0
}
