use core::fmt;

use crate::block::{BlockPtr, Heap};
use crate::size_class::{SizeClassPolicy, NUM_CLASSES};

/// A `BlockTable` is the set of segregated free lists: one doubly linked list
/// of free blocks per size class.
///
/// The lists are intrusive. Their links live in the payload of the free
/// blocks themselves (see [`crate::block`]), so the table only owns the list
/// heads. A block is "owned" by the table from [`insert`](BlockTable::insert)
/// until [`remove`](BlockTable::remove), and in the meantime nobody else may
/// touch its payload.
///
/// It maintains a few internal invariants:
///
/// - Every free block is in exactly one list, the one its size classifies to.
/// - A list head has no previous link, and `next.prev == block` along a list.
/// - Allocated blocks are in no list.
#[derive(Clone, Debug)]
pub struct BlockTable {
    heads: [Option<BlockPtr>; NUM_CLASSES],
    policy: SizeClassPolicy,
}

impl Default for BlockTable {
    fn default() -> Self {
        BlockTable::new(SizeClassPolicy::default())
    }
}

/// Walks one size class's list, front to back.
pub(crate) struct BlockIter<'heap> {
    heap: &'heap Heap,
    next: Option<BlockPtr>,
}

impl<'heap> Iterator for BlockIter<'heap> {
    type Item = BlockPtr;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = self.heap.next_free(current);
        Some(current)
    }
}

impl BlockTable {
    pub const fn new(policy: SizeClassPolicy) -> Self {
        BlockTable {
            heads: [None; NUM_CLASSES],
            policy,
        }
    }

    pub fn policy(&self) -> &SizeClassPolicy {
        &self.policy
    }

    pub fn head(&self, class: usize) -> Option<BlockPtr> {
        self.heads[class]
    }

    /// Forget every list. Used when a fresh heap is laid down.
    pub fn clear(&mut self) {
        self.heads = [None; NUM_CLASSES];
    }

    /// Iterate over the free blocks of one size class.
    pub fn iter_class<'heap>(&self, heap: &'heap Heap, class: usize) -> BlockIter<'heap> {
        BlockIter {
            heap,
            next: self.heads[class],
        }
    }

    /// Push a free block onto the front of its class's list.
    ///
    /// The block's header must already hold its final size, since that picks
    /// the list.
    pub fn insert(&mut self, heap: &mut Heap, bp: BlockPtr) {
        let class = self.policy.classify(heap.header(bp).size());
        let old_head = self.heads[class];

        heap.set_prev_free(bp, None);
        heap.set_next_free(bp, old_head);
        if let Some(old_head) = old_head {
            heap.set_prev_free(old_head, Some(bp));
        }
        self.heads[class] = Some(bp);
    }

    /// Unlink a free block from its class's list, using only its own links.
    ///
    /// The block's header must still hold the size it was inserted with.
    pub fn remove(&mut self, heap: &mut Heap, bp: BlockPtr) {
        let prev = heap.prev_free(bp);
        let next = heap.next_free(bp);

        match prev {
            Some(prev) => heap.set_next_free(prev, next),
            None => {
                let class = self.policy.classify(heap.header(bp).size());
                debug_assert_eq!(self.heads[class], Some(bp), "block is not its list's head");
                self.heads[class] = next;
            }
        }
        if let Some(next) = next {
            heap.set_prev_free(next, prev);
        }

        heap.set_prev_free(bp, None);
        heap.set_next_free(bp, None);
    }

    /// First fit, searching `size`'s own class and then every larger one.
    ///
    /// Within a class, the first block big enough wins, which makes the most
    /// recently freed candidate the preferred one.
    pub fn find_fit(&self, heap: &Heap, size: usize) -> Option<BlockPtr> {
        (self.policy.classify(size)..NUM_CLASSES).find_map(|class| {
            self.iter_class(heap, class)
                .find(|&bp| heap.header(bp).size() >= size)
        })
    }

    /// A `Display`able view of every list, for logs.
    pub fn display<'a>(&'a self, heap: &'a Heap) -> TableDisplay<'a> {
        TableDisplay { table: self, heap }
    }
}

pub struct TableDisplay<'a> {
    table: &'a BlockTable,
    heap: &'a Heap,
}

impl fmt::Display for TableDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockTable(")?;
        let mut start = true;
        for class in 0..NUM_CLASSES {
            if self.table.heads[class].is_none() {
                continue;
            }
            if !start {
                write!(f, "; ")?;
            } else {
                start = false;
            }
            let range = self.table.policy.range(class);
            write!(f, "{}..={}: ", range.start(), range.end())?;
            for (i, bp) in self.table.iter_class(self.heap, class).enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "FreeBlock({:#x}, {})", bp.offset(), self.heap.header(bp).size())?;
            }
        }
        write!(f, ")")
    }
}
