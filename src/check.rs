//! Full-heap consistency checking.
//!
//! This walks every block in address order and every free list, so it is
//! linear in the heap size (quadratic in the worst case, since each free block
//! is looked up in its list). It is a debugging aid, not something to run on
//! the allocation path in production.

use core::fmt;

use log::{error, trace};

use crate::block::{BlockPtr, Heap, Tag, ALIGNMENT, MIN_BLOCK_SIZE};
use crate::blocklist::BlockTable;
use crate::size_class::NUM_CLASSES;

/// Validity contains a representation of all invalid states found in a heap.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    /// Prologue or epilogue missing or malformed, or the block walk did not
    /// end exactly at the heap end.
    pub bad_sentinels: usize,
    /// Blocks whose size is misaligned or below the minimum, or that run past
    /// the heap end. The walk stops at the first one.
    pub bad_sizes: usize,
    /// Free blocks whose header and footer differ.
    pub tag_mismatches: usize,
    /// Pairs of physically adjacent free blocks. This shouldn't happen, but
    /// isn't totally corrupt.
    pub uncoalesced: usize,
    /// Headers whose prev-allocated bit disagrees with the block to the left.
    pub stale_prev_bits: usize,
    /// List entries that are marked allocated.
    pub allocated_in_list: usize,
    /// List entries filed under the wrong size class.
    pub misfiled: usize,
    /// List links that point outside the heap, or whose back link is wrong.
    pub broken_links: usize,
    /// Free blocks that their size class's list does not contain.
    pub unlisted: usize,
}

impl Validity {
    /// Returns a boolean - a simple check if all cases are 0
    pub fn is_valid(&self) -> bool {
        *self == Validity::default()
    }
}

impl From<Validity> for bool {
    fn from(v: Validity) -> bool {
        v.is_valid()
    }
}

/// A census of the heap, gathered during the same walk.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Total heap bytes, sentinels included.
    pub heap_size: usize,
    pub allocated_blocks: usize,
    /// Sum of allocated block sizes, headers included.
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    /// Entries found across all free lists.
    pub listed_blocks: usize,
}

impl Stats {
    /// Bytes not accounted for by blocks: the pad, the prologue and the
    /// epilogue header.
    pub fn overhead(&self) -> usize {
        self.heap_size - self.allocated_bytes - self.free_bytes
    }
}

/// Check every heap invariant, reporting each violation through `log::error!`.
pub(crate) fn check_heap(heap: &Heap, blocks: &BlockTable) -> (Validity, Stats) {
    let mut validity = Validity::default();
    let mut stats = Stats {
        heap_size: heap.len(),
        ..Stats::default()
    };

    let prologue = heap.prologue();
    if heap.len() < Heap::SENTINEL_BYTES
        || heap.header(prologue) != Tag::pack(ALIGNMENT, true).with_prev_allocated(true)
        || heap.footer(prologue) != heap.header(prologue)
    {
        error!("heap check: malformed prologue");
        validity.bad_sentinels += 1;
        return (validity, stats);
    }

    walk_blocks(heap, blocks, &mut validity, &mut stats);
    walk_lists(heap, blocks, &mut validity, &mut stats);

    (validity, stats)
}

fn walk_blocks(heap: &Heap, blocks: &BlockTable, validity: &mut Validity, stats: &mut Stats) {
    let mut prev_allocated = true;
    let mut bp = heap.next_block(heap.prologue());

    loop {
        let tag = heap.header(bp);
        let size = tag.size();
        trace!("heap check: {:?} {:?}", bp, tag);

        if tag.prev_allocated() != prev_allocated {
            error!("heap check: {:?} has a stale prev-allocated bit", bp);
            validity.stale_prev_bits += 1;
        }

        if size == 0 {
            if !tag.is_allocated() || bp != heap.epilogue() {
                error!("heap check: epilogue {:?} malformed or misplaced", bp);
                validity.bad_sentinels += 1;
            }
            return;
        }

        if size % ALIGNMENT != 0 || size < MIN_BLOCK_SIZE || bp.offset() + size > heap.len() {
            error!("heap check: {:?} has a bad size {}", bp, size);
            validity.bad_sizes += 1;
            return;
        }

        if tag.is_allocated() {
            stats.allocated_blocks += 1;
            stats.allocated_bytes += size;
        } else {
            stats.free_blocks += 1;
            stats.free_bytes += size;

            if !prev_allocated {
                error!("heap check: free blocks escaped coalescing at {:?}", bp);
                validity.uncoalesced += 1;
            }
            if heap.footer(bp) != tag {
                error!(
                    "heap check: {:?} header {:?} and footer {:?} differ",
                    bp,
                    tag,
                    heap.footer(bp)
                );
                validity.tag_mismatches += 1;
            }
            let class = blocks.policy().classify(size);
            if !list_contains(heap, blocks, class, bp, heap.len() / MIN_BLOCK_SIZE) {
                error!("heap check: free {:?} is not in free list {}", bp, class);
                validity.unlisted += 1;
            }
        }

        prev_allocated = tag.is_allocated();
        bp = heap.next_block(bp);
    }
}

/// Every block of the heap in address order, one per line, for logs and
/// debugging. Created by [`RawAlloc::dump`](crate::RawAlloc::dump).
///
/// The listing stops early at a block whose size can't be walked past.
pub struct HeapDump<'a> {
    pub(crate) heap: &'a Heap,
}

impl fmt::Display for HeapDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heap = self.heap;
        writeln!(f, "Heap({} bytes)", heap.len())?;
        let mut bp = heap.next_block(heap.prologue());
        loop {
            let tag = heap.header(bp);
            let size = tag.size();
            if size == 0 {
                return writeln!(f, "  {:?} epilogue {:?}", bp, tag);
            }
            writeln!(f, "  {:?} {:?}", bp, tag)?;
            if size % ALIGNMENT != 0 || size < MIN_BLOCK_SIZE || bp.offset() + size > heap.len() {
                return writeln!(f, "  (unwalkable size, listing stops)");
            }
            bp = heap.next_block(bp);
        }
    }
}

// Bounded search of one list, so a cycle can't hang the checker.
fn list_contains(
    heap: &Heap,
    blocks: &BlockTable,
    class: usize,
    target: BlockPtr,
    max_steps: usize,
) -> bool {
    let mut next = blocks.head(class);
    let mut steps = 0;
    while let Some(bp) = next {
        if bp == target {
            return true;
        }
        steps += 1;
        if steps > max_steps || !heap.contains(bp) || bp == heap.epilogue() {
            return false;
        }
        next = heap.next_free(bp);
    }
    false
}

fn walk_lists(heap: &Heap, blocks: &BlockTable, validity: &mut Validity, stats: &mut Stats) {
    // No list can be longer than the number of minimum blocks in the heap.
    let max_steps = heap.len() / MIN_BLOCK_SIZE;

    for class in 0..NUM_CLASSES {
        let mut prev: Option<BlockPtr> = None;
        let mut next = blocks.head(class);
        let mut steps = 0;

        while let Some(bp) = next {
            steps += 1;
            if steps > max_steps || !heap.contains(bp) || bp == heap.epilogue() {
                error!("heap check: list {} links outside the heap or loops", class);
                validity.broken_links += 1;
                break;
            }
            stats.listed_blocks += 1;

            let tag = heap.header(bp);
            if tag.is_allocated() {
                error!("heap check: allocated {:?} found in free list {}", bp, class);
                validity.allocated_in_list += 1;
            } else if blocks.policy().classify(tag.size()) != class {
                error!(
                    "heap check: {:?} of {} bytes filed in list {}",
                    bp,
                    tag.size(),
                    class
                );
                validity.misfiled += 1;
            }
            if heap.prev_free(bp) != prev {
                error!("heap check: {:?} has a wrong back link", bp);
                validity.broken_links += 1;
            }

            prev = Some(bp);
            next = heap.next_free(bp);
        }
    }
}
