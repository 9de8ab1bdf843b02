//! Size classes for the segregated free lists.
//!
//! A free block lives in the bucket whose range covers its size. Buckets are
//! searched from the request's own class upward, so a lookup never visits
//! lists that only hold blocks too small to help.

use core::ops::RangeInclusive;

use crate::block::MIN_BLOCK_SIZE;
use crate::error::HeapError;

/// Number of buckets in the free-list table.
pub const NUM_CLASSES: usize = 9;

/// Inclusive upper bounds of every bucket but the last, which is unbounded.
pub const DEFAULT_BOUNDS: [usize; NUM_CLASSES - 1] = [16, 64, 128, 256, 512, 1024, 2056, 4096];

/// Maps block sizes to bucket indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeClassPolicy {
    bounds: [usize; NUM_CLASSES - 1],
}

impl Default for SizeClassPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SizeClassPolicy {
    /// The default buckets: ≤16, 17–64, 65–128, ..., 2057–4096, >4096.
    pub const fn new() -> Self {
        SizeClassPolicy {
            bounds: DEFAULT_BOUNDS,
        }
    }

    /// Build a policy from custom inclusive upper bounds.
    ///
    /// The bounds must be strictly increasing, and the first one must be able
    /// to hold a minimum-sized block.
    pub fn with_bounds(bounds: [usize; NUM_CLASSES - 1]) -> Result<Self, HeapError> {
        if bounds[0] < MIN_BLOCK_SIZE || bounds.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(HeapError::InvalidSizeClasses);
        }
        Ok(SizeClassPolicy { bounds })
    }

    pub fn bounds(&self) -> &[usize; NUM_CLASSES - 1] {
        &self.bounds
    }

    /// The bucket index for a block of `size` bytes.
    pub fn classify(&self, size: usize) -> usize {
        self.bounds
            .iter()
            .position(|&bound| size <= bound)
            .unwrap_or(NUM_CLASSES - 1)
    }

    /// The block sizes that bucket `class` holds.
    pub fn range(&self, class: usize) -> RangeInclusive<usize> {
        let low = match class {
            0 => 0,
            _ => self.bounds[class - 1] + 1,
        };
        let high = self.bounds.get(class).copied().unwrap_or(usize::MAX);
        low..=high
    }
}
