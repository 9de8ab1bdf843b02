//! Heap growth primitives.
//!
//! The allocator asks a [`HeapGrower`] for more memory the way a C allocator
//! calls `sbrk`: "give me `size` more bytes at the end of the heap, and tell
//! me where the old end was".

use core::fmt;
use core::ptr::NonNull;

use thiserror::Error;

#[cfg(feature = "use_libc")]
use crate::block::round_up;

pub trait HeapGrower {
    type Err: fmt::Debug;

    /// Grow the heap by exactly `size` bytes, returning the previous heap end,
    /// which is where the new bytes start.
    ///
    /// # Safety
    ///
    /// This is pretty much entirely unsafe.
    ///
    /// For this to function properly with the other types in this crate:
    ///
    /// - `size` is always a multiple of 8.
    /// - Successive successful calls must return adjacent regions, each one
    ///   starting where the previous one ended.
    /// - The memory returned must be available and untracked by any other rust
    ///   code, including the allocator itself.
    unsafe fn grow_heap(&mut self, size: usize) -> Result<NonNull<u8>, Self::Err>;
}

/// Capacity of a [`ToyHeap`], in bytes.
pub const TOY_HEAP_CAPACITY: usize = 256 * 1024;

#[repr(C, align(16))]
struct Arena([u8; TOY_HEAP_CAPACITY]);

/// A fixed array that can pretend to be a heap. It is mainly useful for
/// testing.
///
/// The memory lives inside the struct, so a `ToyHeap` (and any allocator
/// holding one) must not move once it has handed memory out.
pub struct ToyHeap {
    /// Bytes handed out so far.
    pub size: usize,
    /// Bytes this heap is willing to hand out, at most `TOY_HEAP_CAPACITY`.
    pub limit: usize,
    heap: Arena,
}

impl Default for ToyHeap {
    fn default() -> Self {
        ToyHeap::with_limit(TOY_HEAP_CAPACITY)
    }
}

impl ToyHeap {
    /// A toy heap that refuses to grow beyond `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        ToyHeap {
            size: 0,
            limit: limit.min(TOY_HEAP_CAPACITY),
            heap: Arena([0; TOY_HEAP_CAPACITY]),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("toy heap overflow: requested {requested} bytes with {available} left")]
pub struct ToyHeapOverflowError {
    pub requested: usize,
    pub available: usize,
}

impl HeapGrower for ToyHeap {
    type Err = ToyHeapOverflowError;

    unsafe fn grow_heap(&mut self, size: usize) -> Result<NonNull<u8>, Self::Err> {
        let available = self.limit - self.size;
        if size > available {
            return Err(ToyHeapOverflowError {
                requested: size,
                available,
            });
        }

        let ptr = self.heap.0.as_mut_ptr().add(self.size);
        self.size += size;
        Ok(NonNull::new_unchecked(ptr))
    }
}

/// Default size of the address range a [`ReservedHeap`] reserves.
#[cfg(feature = "use_libc")]
pub const DEFAULT_RESERVATION: usize = 1 << 30;

/// ReservedHeap reserves one large range of virtual memory on first use, and
/// then hands it out front to back, like `sbrk` over a private break.
///
/// The range is mapped with `MAP_NORESERVE`, so untouched pages cost nothing.
#[cfg(feature = "use_libc")]
pub struct ReservedHeap {
    base: Option<NonNull<u8>>,
    capacity: usize,
    brk: usize,
    // Just for tracking, not really needed
    growths: usize,
}

// The reservation is only ever reached through the allocator that owns it.
#[cfg(feature = "use_libc")]
unsafe impl Send for ReservedHeap {}

#[cfg(feature = "use_libc")]
impl Default for ReservedHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "use_libc")]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReservedHeapError {
    #[error("mmap of the heap reservation failed: {0}")]
    Map(errno::Errno),
    #[error("heap reservation exhausted: requested {requested} bytes with {remaining} left")]
    Exhausted { requested: usize, remaining: usize },
}

#[cfg(feature = "use_libc")]
impl ReservedHeap {
    pub const fn new() -> Self {
        Self::with_capacity(DEFAULT_RESERVATION)
    }

    /// A heap that reserves `capacity` bytes (rounded up to whole pages).
    pub const fn with_capacity(capacity: usize) -> Self {
        ReservedHeap {
            base: None,
            capacity,
            brk: 0,
            growths: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> usize {
        self.brk
    }

    pub fn growths(&self) -> usize {
        self.growths
    }

    unsafe fn reserve(&mut self) -> Result<NonNull<u8>, ReservedHeapError> {
        let pagesize = sysconf::page::pagesize();
        let length = round_up(self.capacity, pagesize);

        let ptr = libc::mmap(
            // Address we want the memory at. We don't care, so null it is.
            core::ptr::null_mut(),
            length,
            // We want read/write access to this memory
            libc::PROT_READ | libc::PROT_WRITE,
            // MAP_ANON: We don't want a file descriptor, we're just going to
            //   use the memory.
            //
            // MAP_PRIVATE: We're not sharing this with any other process.
            //
            // MAP_NORESERVE: Don't charge swap for pages we never touch.
            libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_NORESERVE,
            -1,
            0,
        );

        if ptr == libc::MAP_FAILED {
            return Err(ReservedHeapError::Map(errno::errno()));
        }

        self.capacity = length;
        NonNull::new(ptr as *mut u8).ok_or(ReservedHeapError::Map(errno::Errno(libc::ENOMEM)))
    }
}

#[cfg(feature = "use_libc")]
impl HeapGrower for ReservedHeap {
    type Err = ReservedHeapError;

    unsafe fn grow_heap(&mut self, size: usize) -> Result<NonNull<u8>, Self::Err> {
        let base = match self.base {
            Some(base) => base,
            None => {
                let base = self.reserve()?;
                self.base = Some(base);
                base
            }
        };

        let remaining = self.capacity - self.brk;
        if size > remaining {
            return Err(ReservedHeapError::Exhausted {
                requested: size,
                remaining,
            });
        }

        let ptr = base.as_ptr().add(self.brk);
        self.brk += size;
        self.growths += 1;
        Ok(NonNull::new_unchecked(ptr))
    }
}
