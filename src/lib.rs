#![cfg_attr(not(test), no_std)]

//! A segregated free-list memory allocator.
//!
//! The heap is one contiguous region, grown at the end through a
//! [`HeapGrower`] and never shrunk. Blocks carry boundary tags so that freeing
//! can merge a block with its neighbours in constant time, and free blocks are
//! kept in a table of doubly linked lists, one per size class. Allocation is
//! first fit, searching the request's size class and then every larger one.
//!
//! The core type is [`RawAlloc`], which is single-threaded: all of its
//! operations take `&mut self`. [`GenericAllocator`] puts one behind a spin
//! lock and implements [`GlobalAlloc`](core::alloc::GlobalAlloc);
//! `UnixAllocator` (feature `use_libc`, on by default) does the same over a
//! memory range reserved with `mmap`.
//!
//! ```
//! use seglist_allocator::{RawAlloc, ToyHeap};
//!
//! let mut allocator = RawAlloc::new(ToyHeap::default());
//! allocator.init().unwrap();
//!
//! let a = allocator.allocate(16).unwrap();
//! let _b = allocator.allocate(16).unwrap();
//! unsafe { allocator.free(Some(a)) };
//! // The freed block is reused before the heap grows.
//! assert_eq!(allocator.allocate(16), Some(a));
//! assert!(allocator.check().0.is_valid());
//! ```

pub mod allocators;
pub mod block;
mod blocklist;
pub mod check;
mod coalesce;
pub mod config;
pub mod error;
pub mod growers;
pub mod size_class;

pub use allocators::{GenericAllocator, RawAlloc};
#[cfg(feature = "use_libc")]
pub use allocators::UnixAllocator;
pub use check::{HeapDump, Stats, Validity};
pub use config::Config;
pub use error::HeapError;
pub use growers::{HeapGrower, ToyHeap};
#[cfg(feature = "use_libc")]
pub use growers::ReservedHeap;
pub use size_class::SizeClassPolicy;
