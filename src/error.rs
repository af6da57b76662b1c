use thiserror::Error;

/// Result type used across the allocator.
pub type AllocResult<T> = Result<T, AllocError>;

/// Everything that can go wrong while managing the heap.
///
/// Zero sized requests and absent pointers are not errors, they are handled
/// as documented no-ops by the allocator itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("Out of memory: the heap could not supply {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("Heap extension at 0x{found:x} is not contiguous with heap end 0x{expected:x}")]
    NonContiguous { expected: usize, found: usize },

    #[error("Heap memory at 0x{0:x} is not 8 byte aligned")]
    Misaligned(usize),

    #[error("Invalid heap configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("Heap corruption detected at 0x{addr:x}: {reason}")]
    CorruptionDetected { addr: usize, reason: &'static str },
}
