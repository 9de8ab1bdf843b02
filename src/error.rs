use thiserror::Error;

/// Errors raised while building or growing the heap.
///
/// The public allocation calls never return these directly; they log them and
/// hand the caller `None`. `init` and the configuration constructors do return
/// them.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// The heap grower refused to hand out more memory.
    #[error("heap growth of {requested} bytes was refused")]
    Exhausted { requested: usize },

    /// Growing would push the heap past what a 32-bit block offset can address.
    #[error("heap growth of {requested} bytes would exceed the {limit} byte limit")]
    TooLarge { requested: usize, limit: usize },

    #[error("allocator is already initialized")]
    AlreadyInitialized,

    #[error("allocator has not been initialized")]
    Uninitialized,

    /// The first region handed out by the grower is not 8-byte aligned.
    #[error("heap base {address:#x} is not 8-byte aligned")]
    Misaligned { address: usize },

    /// The grower returned memory that does not continue the current heap.
    #[error("heap growth returned {found:#x}, expected the heap end at {expected:#x}")]
    Discontiguous { expected: usize, found: usize },

    /// Size-class bounds must be strictly increasing and start at or above
    /// the minimum block size.
    #[error("size-class bounds are not strictly increasing from the minimum block size")]
    InvalidSizeClasses,
}
