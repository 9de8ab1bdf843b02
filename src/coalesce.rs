use crate::block::{BlockPtr, Heap, Tag};
use crate::blocklist::BlockTable;

/// Merge a just-freed (or just-grown) block with whichever neighbours are
/// free, file the result in its size class, and return it.
///
/// `bp` must carry a free header and footer and must not be in any list yet.
/// Its neighbours must be coalesced already, so at most one free block sits on
/// each side; afterwards no two free blocks touch.
pub(crate) fn coalesce(heap: &mut Heap, blocks: &mut BlockTable, bp: BlockPtr) -> BlockPtr {
    let tag = heap.header(bp);
    let next = heap.next_block(bp);
    let next_tag = heap.header(next);

    let mut start = bp;
    let mut size = tag.size();

    match (tag.prev_allocated(), next_tag.is_allocated()) {
        (true, true) => {}
        (true, false) => {
            blocks.remove(heap, next);
            size += next_tag.size();
        }
        (false, true) => {
            let prev = heap.prev_block(bp);
            blocks.remove(heap, prev);
            size += heap.header(prev).size();
            start = prev;
        }
        (false, false) => {
            let prev = heap.prev_block(bp);
            blocks.remove(heap, prev);
            blocks.remove(heap, next);
            size += heap.header(prev).size() + next_tag.size();
            start = prev;
        }
    }

    // Whatever sits left of the merged block is allocated, and whatever sits
    // right of it now has a free neighbour.
    let merged = Tag::pack(size, false).with_prev_allocated(true);
    heap.set_tags(start, merged);
    let after = heap.next_block(start);
    heap.set_prev_allocated(after, false);

    if start != bp || size != tag.size() {
        log::trace!("coalesced {:?} into {:?} ({} bytes)", bp, start, size);
    }
    blocks.insert(heap, start);
    start
}
