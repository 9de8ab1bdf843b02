//! Boundary-tag encoding of a single heap block.
//!
//! Every block starts with a one-word header. Free blocks additionally carry
//! two link words at the start of their payload and a footer that repeats the
//! header in their last word:
//!
//! ```text
//!   allocated:  | size|p|1 | payload ..................................... |
//!   free:       | size|p|0 | prev link | next link | ...... | size|p|0 |
//!               ^          ^
//!               header     BlockPtr (payload offset)
//! ```
//!
//! `p` is set when the block to the left is allocated. That is what lets an
//! allocated block drop its footer: its right neighbour never has to look at
//! it unless the `p` bit says it is free.
//!
//! Blocks are named by `BlockPtr`, the byte offset of their payload from the
//! heap base, and all memory traffic goes through `Heap`, which
//! bounds-checks every word it touches in debug builds. Both stay inside the
//! crate: their accessors trust the allocator to only name real blocks, so
//! only the word layout ([`Tag`] and the size constants) is public.
//!
//! ```compile_fail
//! // Raw heap access is not part of the public API.
//! use seglist_allocator::block::Heap;
//! ```

use core::fmt;
use core::ptr::NonNull;

use static_assertions::const_assert;

/// Size of a header, footer or link word, in bytes.
pub const WSIZE: usize = 4;
/// Payload alignment and size granularity, in bytes.
pub const ALIGNMENT: usize = 8;
/// Smallest block that can hold a header, two links and a footer.
pub const MIN_BLOCK_SIZE: usize = 4 * WSIZE;
/// Largest heap whose offsets still fit in a link word.
pub const MAX_HEAP_SIZE: usize = (u32::MAX as usize) & !(ALIGNMENT - 1);

const_assert!(MIN_BLOCK_SIZE % ALIGNMENT == 0);
const_assert!(2 * WSIZE == ALIGNMENT);

const ALLOC_BIT: u32 = 0x1;
const PREV_ALLOC_BIT: u32 = 0x2;
const FLAG_MASK: u32 = 0x7;

/// Round `value` up to the nearest multiple of `increment`.
pub(crate) fn round_up(value: usize, increment: usize) -> usize {
    if value == 0 {
        return 0;
    }
    increment * ((value - 1) / increment + 1)
}

/// One header or footer word: a block size packed with its flag bits.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(u32);

impl Tag {
    /// Encode a block size and allocation flag. The prev-allocated bit starts
    /// cleared; see [`Tag::with_prev_allocated`].
    pub fn pack(size: usize, allocated: bool) -> Tag {
        debug_assert!(size % ALIGNMENT == 0, "block size {} is not aligned", size);
        debug_assert!(size <= MAX_HEAP_SIZE, "block size {} is too large", size);
        let flag = if allocated { ALLOC_BIT } else { 0 };
        Tag(size as u32 | flag)
    }

    pub fn with_prev_allocated(self, prev_allocated: bool) -> Tag {
        if prev_allocated {
            Tag(self.0 | PREV_ALLOC_BIT)
        } else {
            Tag(self.0 & !PREV_ALLOC_BIT)
        }
    }

    pub fn size(self) -> usize {
        (self.0 & !FLAG_MASK) as usize
    }

    pub fn is_allocated(self) -> bool {
        self.0 & ALLOC_BIT != 0
    }

    pub fn prev_allocated(self) -> bool {
        self.0 & PREV_ALLOC_BIT != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tag({}, {}{})",
            self.size(),
            if self.is_allocated() { "alloc" } else { "free" },
            if self.prev_allocated() { ", prev alloc" } else { "" },
        )
    }
}

/// The payload offset of a block, measured from the heap base.
///
/// Offset 0 is never a payload (the alignment pad lives there), which lets a
/// link word use 0 for "no block".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct BlockPtr(u32);

impl BlockPtr {
    pub(crate) fn new(offset: usize) -> BlockPtr {
        debug_assert!(offset <= MAX_HEAP_SIZE, "offset {:#x} out of range", offset);
        debug_assert!(offset % ALIGNMENT == 0, "offset {:#x} is misaligned", offset);
        BlockPtr(offset as u32)
    }

    pub fn offset(self) -> usize {
        self.0 as usize
    }

    fn header_offset(self) -> usize {
        self.offset() - WSIZE
    }

    fn encode(link: Option<BlockPtr>) -> u32 {
        link.map_or(0, |bp| bp.0)
    }

    fn decode(word: u32) -> Option<BlockPtr> {
        if word == 0 {
            None
        } else {
            Some(BlockPtr(word))
        }
    }
}

impl fmt::Debug for BlockPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockPtr(+{:#x})", self.0)
    }
}

/// A view of the heap region: its base address and current length.
///
/// Invariant: `base..base + len` is memory handed out by the heap grower and
/// owned by the allocator. Everything else in this type relies on that.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Heap {
    base: NonNull<u8>,
    len: usize,
}

impl Heap {
    /// Offset of the prologue block's payload.
    pub const PROLOGUE: usize = 2 * WSIZE;
    /// Bytes taken by the alignment pad, the prologue, and the epilogue header.
    pub const SENTINEL_BYTES: usize = 4 * WSIZE;

    /// # Safety
    ///
    /// `base` must be 8-byte aligned and point to at least `len` bytes of
    /// memory that nothing else reads or writes.
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Heap {
        debug_assert!(base.as_ptr() as usize % ALIGNMENT == 0);
        Heap { base, len }
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// The address one past the last heap byte, where the next growth lands.
    pub fn end(&self) -> *mut u8 {
        self.base.as_ptr().wrapping_add(self.len)
    }

    /// Extend the view by `bytes` that were just appended by the grower.
    ///
    /// # Safety
    ///
    /// The `bytes` following the current end must now belong to this heap.
    pub unsafe fn grow(&mut self, bytes: usize) {
        self.len += bytes;
    }

    pub fn prologue(&self) -> BlockPtr {
        BlockPtr::new(Self::PROLOGUE)
    }

    /// The epilogue's "payload" sits at the heap end; its header is the last
    /// word of the heap.
    pub fn epilogue(&self) -> BlockPtr {
        BlockPtr::new(self.len)
    }

    /// Whether `bp` could name a block with a header inside the heap.
    pub fn contains(&self, bp: BlockPtr) -> bool {
        bp.offset() >= Self::PROLOGUE && bp.offset() <= self.len && bp.offset() % ALIGNMENT == 0
    }

    fn read_word(&self, offset: usize) -> u32 {
        debug_assert!(
            offset % WSIZE == 0 && offset + WSIZE <= self.len,
            "read of word {:#x} outside heap of {} bytes",
            offset,
            self.len
        );
        unsafe { self.base.as_ptr().add(offset).cast::<u32>().read() }
    }

    fn write_word(&mut self, offset: usize, value: u32) {
        debug_assert!(
            offset % WSIZE == 0 && offset + WSIZE <= self.len,
            "write of word {:#x} outside heap of {} bytes",
            offset,
            self.len
        );
        unsafe { self.base.as_ptr().add(offset).cast::<u32>().write(value) }
    }

    pub(crate) fn clear_pad(&mut self) {
        self.write_word(0, 0);
    }

    pub fn header(&self, bp: BlockPtr) -> Tag {
        Tag(self.read_word(bp.header_offset()))
    }

    pub fn set_header(&mut self, bp: BlockPtr, tag: Tag) {
        self.write_word(bp.header_offset(), tag.0);
    }

    /// The footer of `bp`, located from the size in its header.
    pub fn footer(&self, bp: BlockPtr) -> Tag {
        let size = self.header(bp).size();
        Tag(self.read_word(bp.offset() + size - ALIGNMENT))
    }

    /// Write a footer for `bp`, located from the size in `tag` so it can be
    /// written before or after the header.
    pub fn set_footer(&mut self, bp: BlockPtr, tag: Tag) {
        self.write_word(bp.offset() + tag.size() - ALIGNMENT, tag.0);
    }

    /// Write `tag` as both header and footer.
    pub fn set_tags(&mut self, bp: BlockPtr, tag: Tag) {
        self.set_header(bp, tag);
        self.set_footer(bp, tag);
    }

    pub fn set_prev_allocated(&mut self, bp: BlockPtr, prev_allocated: bool) {
        let tag = self.header(bp).with_prev_allocated(prev_allocated);
        self.set_header(bp, tag);
    }

    pub fn next_block(&self, bp: BlockPtr) -> BlockPtr {
        BlockPtr::new(bp.offset() + self.header(bp).size())
    }

    /// The block to the left of `bp`, found through its footer. Only valid
    /// when that block is free or is the prologue.
    pub fn prev_block(&self, bp: BlockPtr) -> BlockPtr {
        let size = Tag(self.read_word(bp.offset() - ALIGNMENT)).size();
        BlockPtr::new(bp.offset() - size)
    }

    pub fn prev_free(&self, bp: BlockPtr) -> Option<BlockPtr> {
        BlockPtr::decode(self.read_word(bp.offset()))
    }

    pub fn next_free(&self, bp: BlockPtr) -> Option<BlockPtr> {
        BlockPtr::decode(self.read_word(bp.offset() + WSIZE))
    }

    pub fn set_prev_free(&mut self, bp: BlockPtr, link: Option<BlockPtr>) {
        self.write_word(bp.offset(), BlockPtr::encode(link));
    }

    pub fn set_next_free(&mut self, bp: BlockPtr, link: Option<BlockPtr>) {
        self.write_word(bp.offset() + WSIZE, BlockPtr::encode(link));
    }

    /// The caller-visible address of a block's payload.
    pub fn payload(&self, bp: BlockPtr) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(bp.offset())) }
    }

    /// The block whose payload starts at `ptr`.
    ///
    /// `ptr` must have come from [`Heap::payload`]; anything else is a misuse
    /// the allocator does not defend against, and only trips the debug
    /// assertions.
    pub fn block_at(&self, ptr: NonNull<u8>) -> BlockPtr {
        let offset = (ptr.as_ptr() as usize).wrapping_sub(self.base.as_ptr() as usize);
        debug_assert!(
            offset > Self::PROLOGUE && offset < self.len,
            "pointer {:p} is not inside the heap",
            ptr
        );
        BlockPtr::new(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[repr(C, align(16))]
    struct Buffer([u8; 128]);

    fn heap_over(buffer: &mut Buffer) -> Heap {
        let base = NonNull::new(buffer.0.as_mut_ptr()).unwrap();
        unsafe { Heap::new(base, buffer.0.len()) }
    }

    #[test]
    fn test_tag_packing() {
        let tag = Tag::pack(48, true);
        assert_eq!(tag.size(), 48);
        assert!(tag.is_allocated());
        assert!(!tag.prev_allocated());
        assert_eq!(tag.bits(), 49);

        let tag = tag.with_prev_allocated(true);
        assert_eq!(tag.size(), 48);
        assert!(tag.prev_allocated());
        assert!(tag.is_allocated());

        let tag = Tag::pack(0, false).with_prev_allocated(true);
        assert_eq!(tag.size(), 0);
        assert!(!tag.is_allocated());
        assert!(!tag.with_prev_allocated(false).prev_allocated());
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 8), 0);
        assert_eq!(round_up(1, 8), 8);
        assert_eq!(round_up(8, 8), 8);
        assert_eq!(round_up(9, 8), 16);
    }

    #[test]
    fn test_tags_and_neighbours() {
        let mut buffer = Buffer([0; 128]);
        let mut heap = heap_over(&mut buffer);

        // A free block of 32 bytes at +16, followed by an allocated one at +48.
        let first = BlockPtr::new(16);
        let free = Tag::pack(32, false).with_prev_allocated(true);
        heap.set_tags(first, free);
        assert_eq!(heap.header(first), free);
        assert_eq!(heap.footer(first), free);

        let second = heap.next_block(first);
        assert_eq!(second.offset(), 48);
        heap.set_header(second, Tag::pack(24, true));
        assert_eq!(heap.prev_block(second), first);

        heap.set_prev_allocated(second, true);
        assert!(heap.header(second).prev_allocated());
        assert_eq!(heap.header(second).size(), 24);
    }

    #[test]
    fn test_links() {
        let mut buffer = Buffer([0; 128]);
        let mut heap = heap_over(&mut buffer);
        let bp = BlockPtr::new(16);
        let other = BlockPtr::new(64);

        heap.set_prev_free(bp, None);
        heap.set_next_free(bp, Some(other));
        assert_eq!(heap.prev_free(bp), None);
        assert_eq!(heap.next_free(bp), Some(other));
    }

    #[test]
    fn test_payload_round_trip() {
        let mut buffer = Buffer([0; 128]);
        let heap = heap_over(&mut buffer);
        let bp = BlockPtr::new(40);
        let ptr = heap.payload(bp);
        assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0);
        assert_eq!(heap.block_at(ptr), bp);
        assert!(heap.contains(bp));
        assert!(!heap.contains(BlockPtr::new(136)));
    }
}
