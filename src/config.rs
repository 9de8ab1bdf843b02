use crate::block::{round_up, ALIGNMENT, MIN_BLOCK_SIZE};
use crate::size_class::SizeClassPolicy;

/// Default number of bytes the heap grows by when no free block fits.
pub const CHUNK_SIZE: usize = 1 << 9;

/// Tuning knobs for a [`RawAlloc`](crate::RawAlloc).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Minimum heap extension, in bytes. Also the size of the first extension
    /// made by `init`.
    pub chunk_size: usize,
    /// Bucket boundaries for the free lists.
    pub size_classes: SizeClassPolicy,
    /// Run the full heap checker after every allocate, free and reallocate,
    /// panicking on the first inconsistency. Defaults to on with the
    /// `heap_check` feature.
    pub check_every_op: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

impl Config {
    pub const fn new() -> Self {
        Config {
            chunk_size: CHUNK_SIZE,
            size_classes: SizeClassPolicy::new(),
            check_every_op: cfg!(feature = "heap_check"),
        }
    }

    /// Set the growth increment. It is rounded up to the alignment and never
    /// drops below one minimum block.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = round_up(chunk_size, ALIGNMENT).max(MIN_BLOCK_SIZE);
        self
    }

    pub fn with_size_classes(mut self, size_classes: SizeClassPolicy) -> Self {
        self.size_classes = size_classes;
        self
    }

    pub fn with_checks(mut self, check_every_op: bool) -> Self {
        self.check_every_op = check_every_op;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn test_chunk_size_rounding() {
        assert_eq!(Config::new().chunk_size, 512);
        assert_eq!(Config::new().with_chunk_size(100).chunk_size, 104);
        assert_eq!(Config::new().with_chunk_size(0).chunk_size, MIN_BLOCK_SIZE);
        assert!(Config::new().with_checks(true).check_every_op);
    }
}
