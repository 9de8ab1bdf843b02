//! Allocator types, both generic and Unix-specific.
//!
//! ## Basic Types
//!
//! ### [`RawAlloc`](struct.RawAlloc.html)
//!
//! A `RawAlloc` is a single-threaded, non-thread-safe heap manager: it owns
//! the heap region, the segregated free lists, and a [`HeapGrower`] to extend
//! the region with. Every `allocate`, `free` and `reallocate` needs `&mut`
//! access, which is how the single-owner requirement shows up in the API.
//!
//! ### [`GenericAllocator`](struct.GenericAllocator.html)
//!
//! A `GenericAllocator` wraps `RawAlloc` with a spin lock to make it
//! thread-safe, implementing
//! [`core::alloc::GlobalAlloc`](https://doc.rust-lang.org/core/alloc/trait.GlobalAlloc.html).
//!
//! ### [`UnixAllocator`](struct.UnixAllocator.html)
//!
//! A `UnixAllocator` combines `GenericAllocator` with a
//! [`ReservedHeap`](crate::ReservedHeap), so it can be used as the global
//! allocator.

use core::alloc::{GlobalAlloc, Layout};
use core::fmt;
use core::ptr::{null_mut, NonNull};

use log::{debug, trace};
use spin::{Mutex, MutexGuard, Once};

use crate::block::{round_up, BlockPtr, Heap, Tag, ALIGNMENT, MAX_HEAP_SIZE, MIN_BLOCK_SIZE, WSIZE};
use crate::blocklist::BlockTable;
use crate::check::{check_heap, HeapDump, Stats, Validity};
use crate::coalesce::coalesce;
use crate::config::Config;
use crate::error::HeapError;
use crate::growers::HeapGrower;
#[cfg(feature = "use_libc")]
use crate::growers::ReservedHeap;

/// A raw allocator, capable of growing the heap, returning pointers to new
/// allocations, and tracking and reusing freed memory.
///
/// Note: It never returns memory to the OS; that is not implemented.
pub struct RawAlloc<G> {
    pub grower: G,
    heap: Option<Heap>,
    blocks: BlockTable,
    config: Config,
}

// The heap is only reachable through the allocator, so it moves with it.
unsafe impl<G: Send> Send for RawAlloc<G> {}

impl<G: HeapGrower + Default> Default for RawAlloc<G> {
    fn default() -> Self {
        RawAlloc::new(G::default())
    }
}

impl<G: HeapGrower> RawAlloc<G> {
    /// Create a new `RawAlloc` with the default configuration.
    pub fn new(grower: G) -> Self {
        Self::with_config(grower, Config::default())
    }

    pub fn with_config(grower: G, config: Config) -> Self {
        RawAlloc {
            grower,
            heap: None,
            blocks: BlockTable::new(config.size_classes),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.heap.is_some()
    }

    /// Address of the first heap byte, once the heap exists.
    pub fn heap_start(&self) -> Option<NonNull<u8>> {
        self.heap.map(|heap| heap.base())
    }

    /// Current heap size in bytes, sentinels included.
    pub fn heap_size(&self) -> usize {
        self.heap.map_or(0, |heap| heap.len())
    }

    /// Calculate the size of the block that serves a request of `size` bytes:
    /// room for the header, rounded up to the alignment, and never smaller
    /// than a minimum block. `None` if no heap could hold it.
    pub fn block_size(size: usize) -> Option<usize> {
        if size > MAX_HEAP_SIZE - WSIZE {
            return None;
        }
        Some(round_up(size + WSIZE, ALIGNMENT).max(MIN_BLOCK_SIZE))
    }

    /// Lay down the prologue and epilogue sentinels and make the first heap
    /// extension.
    ///
    /// If the sentinels go down but the first extension fails, the error is
    /// returned and the allocator stays initialized with an empty heap; later
    /// allocations try to grow it again.
    pub fn init(&mut self) -> Result<(), HeapError> {
        if self.heap.is_some() {
            return Err(HeapError::AlreadyInitialized);
        }

        let base = self.sbrk(Heap::SENTINEL_BYTES)?;
        if base.as_ptr() as usize % ALIGNMENT != 0 {
            return Err(HeapError::Misaligned {
                address: base.as_ptr() as usize,
            });
        }

        let mut heap = unsafe { Heap::new(base, Heap::SENTINEL_BYTES) };
        heap.clear_pad();
        let prologue = Tag::pack(ALIGNMENT, true).with_prev_allocated(true);
        heap.set_tags(heap.prologue(), prologue);
        heap.set_header(heap.epilogue(), Tag::pack(0, true).with_prev_allocated(true));

        self.heap = Some(heap);
        self.blocks.clear();
        debug!("initialized heap at {:p}", base);

        self.extend_heap(self.config.chunk_size)?;
        Ok(())
    }

    fn ensure_init(&mut self) -> bool {
        if self.heap.is_none() {
            if let Err(err) = self.init() {
                debug!("lazy heap initialization failed: {}", err);
            }
        }
        self.heap.is_some()
    }

    pub(crate) fn parts(&mut self) -> Option<(&mut Heap, &mut BlockTable)> {
        let heap = self.heap.as_mut()?;
        Some((heap, &mut self.blocks))
    }

    // Ask the grower for `size` more bytes and make sure they continue the
    // heap we already have.
    fn sbrk(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let ptr = unsafe { self.grower.grow_heap(size) }.map_err(|err| {
            debug!("heap grower refused {} bytes: {:?}", size, err);
            HeapError::Exhausted { requested: size }
        })?;

        if let Some(heap) = &self.heap {
            if ptr.as_ptr() != heap.end() {
                return Err(HeapError::Discontiguous {
                    expected: heap.end() as usize,
                    found: ptr.as_ptr() as usize,
                });
            }
        }
        Ok(ptr)
    }

    /// Grow the heap by at least `bytes` (rounded to the alignment), turn the
    /// new space into a free block, and coalesce it with a free block that
    /// ended at the old epilogue.
    fn extend_heap(&mut self, bytes: usize) -> Result<BlockPtr, HeapError> {
        let size = round_up(bytes, ALIGNMENT);
        let len = self.heap.as_ref().ok_or(HeapError::Uninitialized)?.len();
        if size > MAX_HEAP_SIZE - len {
            return Err(HeapError::TooLarge {
                requested: size,
                limit: MAX_HEAP_SIZE,
            });
        }

        self.sbrk(size)?;

        let (heap, blocks) = self.parts().ok_or(HeapError::Uninitialized)?;
        // The old epilogue header becomes the new block's header.
        let bp = heap.epilogue();
        let prev_allocated = heap.header(bp).prev_allocated();
        unsafe { heap.grow(size) };

        heap.set_tags(bp, Tag::pack(size, false).with_prev_allocated(prev_allocated));
        heap.set_header(heap.epilogue(), Tag::pack(0, true));
        debug!("extended heap by {} bytes to {}", size, heap.len());

        Ok(coalesce(heap, blocks, bp))
    }

    ////////////////////////////////////////////////////////////
    // Allocation, deallocation, reallocation

    /// Allocate at least `size` bytes, 8-byte aligned.
    ///
    /// Returns `None` for `size == 0`, or when the heap can't grow enough.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || !self.ensure_init() {
            return None;
        }
        let asize = Self::block_size(size)?;

        let (heap, blocks) = self.parts()?;
        let bp = match blocks.find_fit(heap, asize) {
            Some(bp) => bp,
            None => match self.extend_heap(asize.max(self.config.chunk_size)) {
                Ok(bp) => bp,
                Err(err) => {
                    debug!("allocation of {} bytes failed: {}", size, err);
                    return None;
                }
            },
        };

        let (heap, blocks) = self.parts()?;
        place(heap, blocks, bp, asize);
        let ptr = heap.payload(bp);
        trace!("allocate({}) -> {:p} ({} byte block)", size, ptr, heap.header(bp).size());

        self.after_mutation();
        Some(ptr)
    }

    /// Deallocate (or "free") a memory block. Freeing `None` does nothing.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` or `reallocate` on this
    /// allocator, and not freed since.
    pub unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let ptr = match ptr {
            Some(ptr) => ptr,
            None => return,
        };
        let (heap, blocks) = match self.parts() {
            Some(parts) => parts,
            None => return,
        };

        let bp = heap.block_at(ptr);
        let tag = heap.header(bp);
        debug_assert!(tag.is_allocated(), "double free of {:p}", ptr);
        trace!("free({:p}) of {} byte block", ptr, tag.size());

        heap.set_tags(
            bp,
            Tag::pack(tag.size(), false).with_prev_allocated(tag.prev_allocated()),
        );
        coalesce(heap, blocks, bp);

        self.after_mutation();
    }

    /// Resize an allocation to hold at least `size` bytes.
    ///
    /// - `ptr == None` is `allocate(size)`.
    /// - `size == 0` frees `ptr` and returns `None`.
    /// - Shrinking returns `ptr` unchanged.
    /// - Growing first tries to absorb a free right neighbour (growing the
    ///   heap if `ptr` is the last block), and only then moves the data.
    ///
    /// If the data has to move and no new block can be had, this returns
    /// `None` and leaves `ptr` allocated and untouched.
    ///
    /// # Safety
    ///
    /// `ptr`, if given, must be a live allocation from this allocator.
    pub unsafe fn reallocate(
        &mut self,
        ptr: Option<NonNull<u8>>,
        size: usize,
    ) -> Option<NonNull<u8>> {
        let ptr = match ptr {
            Some(ptr) => ptr,
            None => return self.allocate(size),
        };
        if size == 0 {
            self.free(Some(ptr));
            return None;
        }

        let asize = Self::block_size(size)?;
        let (heap, _) = self.parts()?;
        let bp = heap.block_at(ptr);
        let current = heap.header(bp).size();

        if asize <= current {
            trace!("reallocate({:p}, {}) kept in place", ptr, size);
            return Some(ptr);
        }

        if self.grow_in_place(bp, current, asize) {
            trace!("reallocate({:p}, {}) grew in place", ptr, size);
            self.after_mutation();
            return Some(ptr);
        }

        let new_ptr = self.allocate(size)?;
        let preserved = (current - WSIZE).min(size);
        core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), preserved);
        self.free(Some(ptr));
        trace!("reallocate({:p}, {}) moved to {:p}", ptr, size, new_ptr);
        Some(new_ptr)
    }

    // Absorb the free block to the right of `bp` if that makes it at least
    // `asize` bytes. When `bp` is the last block, the heap grows first.
    fn grow_in_place(&mut self, bp: BlockPtr, current: usize, asize: usize) -> bool {
        let at_end = match self.parts() {
            Some((heap, _)) => heap.next_block(bp) == heap.epilogue(),
            None => return false,
        };
        if at_end {
            let shortfall = asize - current;
            if let Err(err) = self.extend_heap(shortfall.max(self.config.chunk_size)) {
                debug!("could not grow the heap under {:?}: {}", bp, err);
                return false;
            }
        }

        let (heap, blocks) = match self.parts() {
            Some(parts) => parts,
            None => return false,
        };
        let next = heap.next_block(bp);
        let next_tag = heap.header(next);
        if next_tag.is_allocated() || current + next_tag.size() < asize {
            return false;
        }

        blocks.remove(heap, next);
        let prev_allocated = heap.header(bp).prev_allocated();
        carve(heap, blocks, bp, current + next_tag.size(), asize, prev_allocated);
        true
    }

    /// The number of bytes the caller may use at `ptr`, which is at least
    /// what was asked for.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation from this allocator.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        match &self.heap {
            Some(heap) => heap.header(heap.block_at(ptr)).size() - WSIZE,
            None => 0,
        }
    }

    ////////////////////////////////////////////////////////////
    // Consistency checking

    /// Get statistics on this allocator, and verify validity of the heap and
    /// its free lists.
    pub fn check(&self) -> (Validity, Stats) {
        match &self.heap {
            Some(heap) => check_heap(heap, &self.blocks),
            None => (Validity::default(), Stats::default()),
        }
    }

    pub fn stats(&self) -> Stats {
        self.check().1
    }

    /// A listing of every block, allocated or free, in address order.
    pub fn dump(&self) -> Option<HeapDump<'_>> {
        self.heap.as_ref().map(|heap| HeapDump { heap })
    }

    /// Run the checker and panic if anything is wrong. Each violation has
    /// already been logged by then.
    pub fn check_or_abort(&self) {
        let (validity, stats) = self.check();
        if !validity.is_valid() {
            panic!(
                "heap consistency check failed: {:?} (stats: {:?})",
                validity, stats
            );
        }
    }

    fn after_mutation(&self) {
        if self.config.check_every_op {
            self.check_or_abort();
        }
    }
}

/// Take free block `bp` off its list and allocate `asize` bytes of it,
/// splitting off the rest when it is big enough to stand alone.
fn place(heap: &mut Heap, blocks: &mut BlockTable, bp: BlockPtr, asize: usize) {
    let tag = heap.header(bp);
    blocks.remove(heap, bp);
    carve(heap, blocks, bp, tag.size(), asize, tag.prev_allocated());
}

// Mark the first `asize` of the `total` bytes at `bp` allocated. A remainder
// of at least one minimum block becomes a free block; anything smaller stays
// with the allocation. `bp` must not be in a free list.
fn carve(
    heap: &mut Heap,
    blocks: &mut BlockTable,
    bp: BlockPtr,
    total: usize,
    asize: usize,
    prev_allocated: bool,
) {
    if total - asize >= MIN_BLOCK_SIZE {
        heap.set_header(bp, Tag::pack(asize, true).with_prev_allocated(prev_allocated));
        let rest = heap.next_block(bp);
        heap.set_tags(rest, Tag::pack(total - asize, false).with_prev_allocated(true));
        // The block after `rest` already knows its left neighbour is free.
        blocks.insert(heap, rest);
    } else {
        heap.set_header(bp, Tag::pack(total, true).with_prev_allocated(prev_allocated));
        let next = heap.next_block(bp);
        heap.set_prev_allocated(next, true);
    }
}

impl<G> fmt::Display for RawAlloc<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.heap {
            Some(heap) => write!(f, "RawAlloc({} bytes, {})", heap.len(), self.blocks.display(heap)),
            None => write!(f, "RawAlloc(uninitialized)"),
        }
    }
}

/// A thread-safe allocator, using a spin lock around a RawAlloc.
///
/// Thread-safety is required for an allocator to be used as a global allocator,
/// so that was easy to add with a spin lock. The lock is not reentrant: a
/// logger that allocates while this is the global allocator must not be
/// enabled at `debug` or `trace` level.
///
/// Layouts aligned to more than 8 bytes are refused with a null pointer.
pub struct GenericAllocator<G> {
    config: Config,
    raw: Once<Mutex<RawAlloc<G>>>,
}

impl<G: HeapGrower + Default> Default for GenericAllocator<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G> GenericAllocator<G> {
    pub const fn new() -> Self {
        Self::with_config(Config::new())
    }

    pub const fn with_config(config: Config) -> Self {
        GenericAllocator {
            config,
            raw: Once::new(),
        }
    }
}

impl<G: HeapGrower + Default> GenericAllocator<G> {
    /// Get a reference to the underlying RawAlloc, creating it on first use.
    ///
    /// # Safety
    ///
    /// This is unsafe because it blocks allocation while the mutex guard is in
    /// place.
    pub unsafe fn get_raw(&self) -> MutexGuard<RawAlloc<G>> {
        self.raw
            .call_once(|| Mutex::new(RawAlloc::with_config(G::default(), self.config)))
            .lock()
    }

    pub fn check(&self) -> (Validity, Stats) {
        unsafe { self.get_raw().check() }
    }
}

unsafe impl<G: HeapGrower + Default + Send> GlobalAlloc for GenericAllocator<G> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return null_mut();
        }
        self.get_raw()
            .allocate(layout.size())
            .map_or(null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.get_raw().free(NonNull::new(ptr))
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return null_mut();
        }
        self.get_raw()
            .reallocate(NonNull::new(ptr), new_size)
            .map_or(null_mut(), NonNull::as_ptr)
    }
}

#[cfg(feature = "use_libc")]
#[derive(Default)]
pub struct UnixAllocator {
    alloc: GenericAllocator<ReservedHeap>,
}

#[cfg(feature = "use_libc")]
impl UnixAllocator {
    pub const fn new() -> Self {
        UnixAllocator {
            alloc: GenericAllocator::new(),
        }
    }

    pub const fn with_config(config: Config) -> Self {
        UnixAllocator {
            alloc: GenericAllocator::with_config(config),
        }
    }

    pub fn check(&self) -> (Validity, Stats) {
        self.alloc.check()
    }
}

#[cfg(feature = "use_libc")]
unsafe impl GlobalAlloc for UnixAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.alloc.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.alloc.dealloc(ptr, layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.alloc.realloc(ptr, layout, new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::growers::ToyHeap;
    use test_log::test;

    fn offset(allocator: &RawAlloc<ToyHeap>, ptr: NonNull<u8>) -> usize {
        ptr.as_ptr() as usize - allocator.heap_start().unwrap().as_ptr() as usize
    }

    fn checked(allocator: &RawAlloc<ToyHeap>) -> Stats {
        let (validity, stats) = allocator.check();
        assert!(validity.is_valid(), "{:?}\n{}", validity, allocator);
        stats
    }

    #[test]
    fn test_basic() {
        let mut allocator = RawAlloc::new(ToyHeap::default());
        allocator.init().unwrap();

        const BLOCKS: usize = 3;
        let sizes: [usize; BLOCKS] = [60, 60, 220];

        let mut pointers = [NonNull::dangling(); BLOCKS];
        for (i, &size) in sizes.iter().enumerate() {
            pointers[i] = allocator.allocate(size).unwrap();
            checked(&allocator);
        }

        // Blocks are carved from the front of the first chunk, back to back.
        for i in 0..BLOCKS - 1 {
            let block = RawAlloc::<ToyHeap>::block_size(sizes[i]).unwrap();
            assert_eq!(offset(&allocator, pointers[i]) + block, offset(&allocator, pointers[i + 1]));
        }
        assert_eq!(offset(&allocator, pointers[0]), 16);

        // Everything fit in the first chunk.
        assert_eq!(allocator.grower.size, Heap::SENTINEL_BYTES + 512);
        let stats = checked(&allocator);
        assert_eq!(stats.allocated_blocks, 3);
        assert_eq!(stats.allocated_bytes, 64 + 64 + 224);
        assert_eq!(stats.free_bytes, 512 - 352);

        ////////////////////////////////////////////////////////////
        // Deallocation

        unsafe { allocator.free(Some(pointers[1])) };
        let stats = checked(&allocator);
        assert_eq!(stats.free_blocks, 2);
        log::info!("dealloc: {}", allocator);

        // A smaller request reuses the hole, splitting it.
        let p24 = allocator.allocate(20).unwrap();
        assert_eq!(p24, pointers[1]);
        let stats = checked(&allocator);
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(stats.free_bytes, 512 - 352 + 40);

        // The 40-byte leftover is reused before the tail of the chunk.
        let p32 = allocator.allocate(32).unwrap();
        assert_eq!(offset(&allocator, p32), offset(&allocator, pointers[1]) + 24);
        let stats = checked(&allocator);
        assert_eq!(stats.free_blocks, 1);
        log::info!("done: {}", allocator);
    }

    #[test]
    fn test_minimum_block() {
        let mut allocator = RawAlloc::new(ToyHeap::default());
        assert_eq!(RawAlloc::<ToyHeap>::block_size(1), Some(16));
        assert_eq!(RawAlloc::<ToyHeap>::block_size(12), Some(16));
        assert_eq!(RawAlloc::<ToyHeap>::block_size(13), Some(24));
        assert_eq!(RawAlloc::<ToyHeap>::block_size(usize::MAX), None);

        let a = allocator.allocate(1).unwrap();
        let b = allocator.allocate(1).unwrap();
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 16);
        assert_eq!(unsafe { allocator.usable_size(a) }, 12);
    }

    #[test]
    fn test_zero_and_lazy_init() {
        let mut allocator = RawAlloc::new(ToyHeap::default());
        assert!(!allocator.is_initialized());
        assert_eq!(allocator.allocate(0), None);
        assert!(allocator.allocate(8).is_some());
        assert!(allocator.is_initialized());
        assert_eq!(allocator.init(), Err(HeapError::AlreadyInitialized));
    }

    #[test]
    fn test_free_none_before_init() {
        let mut allocator = RawAlloc::new(ToyHeap::default());
        unsafe { allocator.free(None) };
        assert!(!allocator.is_initialized());
        assert_eq!(allocator.heap_size(), 0);
    }

    #[test]
    fn test_exhaustion() {
        let mut allocator = RawAlloc::new(ToyHeap::with_limit(2048));
        allocator.init().unwrap();

        assert_eq!(allocator.allocate(4096), None);
        // The failed growth left the heap alone.
        let stats = checked(&allocator);
        assert_eq!(stats.heap_size, 16 + 512);

        let p = allocator.allocate(1000).unwrap();
        assert_eq!(allocator.heap_size(), 16 + 512 + 1008);
        assert!(allocator.allocate(1000).is_none());
        unsafe { allocator.free(Some(p)) };
        assert!(allocator.allocate(1000).is_some());
        checked(&allocator);
    }

    #[test]
    fn test_init_failure() {
        let mut allocator = RawAlloc::new(ToyHeap::with_limit(8));
        assert_eq!(
            allocator.init(),
            Err(HeapError::Exhausted {
                requested: Heap::SENTINEL_BYTES
            })
        );
        assert!(!allocator.is_initialized());
    }

    #[test]
    fn test_first_chunk_failure() {
        // Sentinels fit, the first chunk doesn't.
        let mut allocator = RawAlloc::new(ToyHeap::with_limit(64));
        assert_eq!(
            allocator.init(),
            Err(HeapError::Exhausted { requested: 512 })
        );
        assert!(allocator.is_initialized());
        assert_eq!(allocator.allocate(16), None);
        let stats = checked(&allocator);
        assert_eq!(stats.heap_size, Heap::SENTINEL_BYTES);
        assert_eq!(stats.free_blocks, 0);
    }

    #[test]
    fn test_small_chunk_fits() {
        let config = Config::new().with_chunk_size(32);
        let mut allocator = RawAlloc::with_config(ToyHeap::with_limit(64), config);
        allocator.init().unwrap();
        let p = allocator.allocate(16).unwrap();
        assert_eq!(allocator.heap_size(), 16 + 32);
        unsafe { allocator.free(Some(p)) };
        checked(&allocator);
    }

    #[test]
    fn test_heap_extension_merges_with_tail() {
        let mut allocator = RawAlloc::new(ToyHeap::default());
        allocator.init().unwrap();

        let a = allocator.allocate(100).unwrap();
        // 408 bytes are left at the tail; the next request needs more, so the
        // heap grows by 1024 and the new space merges with that tail.
        let b = allocator.allocate(1020).unwrap();
        assert_eq!(offset(&allocator, b), offset(&allocator, a) + 104);
        assert_eq!(allocator.heap_size(), 16 + 512 + 1024);

        let stats = checked(&allocator);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, 512 + 1024 - 104 - 1024);
    }

    #[test]
    fn test_realloc_shrink_is_noop() {
        let mut allocator = RawAlloc::new(ToyHeap::default());
        let p = allocator.allocate(100).unwrap();
        let q = unsafe { allocator.reallocate(Some(p), 40) }.unwrap();
        assert_eq!(p, q);
        assert_eq!(unsafe { allocator.usable_size(q) }, 100);
        checked(&allocator);
    }

    #[test]
    fn test_realloc_grows_into_free_neighbour() {
        let mut allocator = RawAlloc::new(ToyHeap::default());
        let p = allocator.allocate(20).unwrap();
        let q = allocator.allocate(100).unwrap();
        let _guard = allocator.allocate(20).unwrap();
        unsafe {
            p.as_ptr().write_bytes(7, 20);
            allocator.free(Some(q));

            let r = allocator.reallocate(Some(p), 60).unwrap();
            assert_eq!(r, p);
            assert_eq!(allocator.usable_size(r), 60);
            assert!((0..20).all(|i| *r.as_ptr().add(i) == 7));
        }
        // 24 + 104 = 128 bytes, of which 64 are used and 64 split off.
        let stats = checked(&allocator);
        assert_eq!(stats.free_blocks, 2);
    }

    #[test]
    fn test_realloc_grows_at_heap_end() {
        let mut allocator = RawAlloc::new(ToyHeap::default());
        let p = allocator.allocate(500).unwrap();
        let size = allocator.heap_size();
        let q = unsafe { allocator.reallocate(Some(p), 2000) }.unwrap();
        assert_eq!(p, q);
        assert!(allocator.heap_size() > size);
        assert!(unsafe { allocator.usable_size(q) } >= 2000);
        checked(&allocator);
    }

    #[test]
    fn test_realloc_moves() {
        let mut allocator = RawAlloc::new(ToyHeap::default());
        let p = allocator.allocate(20).unwrap();
        let _guard = allocator.allocate(20).unwrap();
        unsafe {
            for i in 0..20 {
                *p.as_ptr().add(i) = i as u8;
            }
            let q = allocator.reallocate(Some(p), 200).unwrap();
            assert_ne!(p, q);
            assert!((0..20).all(|i| *q.as_ptr().add(i) == i as u8));
        }
        let stats = checked(&allocator);
        assert_eq!(stats.allocated_blocks, 2);
    }

    #[test]
    fn test_realloc_failure_keeps_original() {
        let mut allocator = RawAlloc::new(ToyHeap::with_limit(16 + 512));
        let p = allocator.allocate(20).unwrap();
        let _guard = allocator.allocate(20).unwrap();
        unsafe {
            p.as_ptr().write_bytes(0x5A, 20);
            assert_eq!(allocator.reallocate(Some(p), 4000), None);
            assert_eq!(allocator.usable_size(p), 20);
            assert!((0..20).all(|i| *p.as_ptr().add(i) == 0x5A));
        }
        let stats = checked(&allocator);
        assert_eq!(stats.allocated_blocks, 2);
    }

    #[test]
    fn test_realloc_edge_cases() {
        let mut allocator = RawAlloc::new(ToyHeap::default());
        unsafe {
            let p = allocator.reallocate(None, 40).unwrap();
            assert!(allocator.usable_size(p) >= 40);
            assert_eq!(allocator.reallocate(Some(p), 0), None);
        }
        let stats = checked(&allocator);
        assert_eq!(stats.allocated_blocks, 0);
        assert_eq!(stats.free_blocks, 1);
    }

    #[test]
    fn test_custom_config() {
        let config = Config::new().with_chunk_size(4096).with_checks(true);
        let mut allocator = RawAlloc::with_config(ToyHeap::default(), config);
        allocator.init().unwrap();
        assert_eq!(allocator.heap_size(), 16 + 4096);

        let p = allocator.allocate(3000).unwrap();
        unsafe { allocator.free(Some(p)) };
        assert_eq!(allocator.stats().free_bytes, 4096);
    }

    #[test]
    fn test_generic_allocator() {
        static ALLOCATOR: GenericAllocator<ToyHeap> = GenericAllocator::new();

        unsafe {
            let layout = Layout::from_size_align(48, 8).unwrap();
            let p = ALLOCATOR.alloc(layout);
            assert!(!p.is_null());
            assert_eq!(p as usize % 8, 0);

            let q = ALLOCATOR.realloc(p, layout, 400);
            assert!(!q.is_null());
            ALLOCATOR.dealloc(q, Layout::from_size_align(400, 8).unwrap());

            let wide = Layout::from_size_align(64, 64).unwrap();
            assert!(ALLOCATOR.alloc(wide).is_null());
        }
        assert!(ALLOCATOR.check().0.is_valid());
    }
}
