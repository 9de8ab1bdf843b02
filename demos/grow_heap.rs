//! A minimal example of the heap growers: reserve address space, hand it out
//! front to back, then run an allocator on top of it.

use seglist_allocator::growers::HeapGrower;
use seglist_allocator::{RawAlloc, ReservedHeap};

fn main() {
    env_logger::init();

    // ReservedHeap maps one range with mmap and hands it out like sbrk.
    let mut grower = ReservedHeap::with_capacity(1 << 20);
    let first = unsafe { grower.grow_heap(8).unwrap() };
    let second = unsafe { grower.grow_heap(4096).unwrap() };
    println!("First growth:  {:p}", first);
    println!("Second growth: {:p} (8 bytes later)", second);
    println!(
        "Reserved {} bytes, {} used in {} growths",
        grower.capacity(),
        grower.used(),
        grower.growths()
    );

    // The same thing, driven by the allocator.
    let mut allocator = RawAlloc::new(ReservedHeap::with_capacity(1 << 20));
    let small = allocator.allocate(100).unwrap();
    println!("Heap after allocate(100):    {} bytes", allocator.heap_size());
    let large = allocator.allocate(64 * 1024).unwrap();
    println!("Heap after allocate(64 KiB): {} bytes", allocator.heap_size());
    unsafe {
        allocator.free(Some(small));
        allocator.free(Some(large));
    }
    let (validity, stats) = allocator.check();
    println!("Valid: {}, {:?}", validity.is_valid(), stats);
    println!("{}", allocator);
}
