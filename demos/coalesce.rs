//! Frees neighbouring blocks and shows them being merged back into a
//! single block. Run with `RUST_LOG=info` to see the heap dumps.

use tagalloc::Allocator;

fn main() {
    env_logger::init();

    let mut allocator = Allocator::new().expect("could not reserve the heap");

    let a = allocator.allocate(64);
    let b = allocator.allocate(64);
    let c = allocator.allocate(64);
    println!("a = {a:?}, b = {b:?}, c = {c:?}");
    allocator.check_heap(true);

    unsafe {
        allocator.free(b);
        println!("Freed b: {:?}", allocator.validate());

        allocator.free(a);
        println!("Freed a, a and b merged: {:?}", allocator.validate());
    }

    let d = allocator.allocate(128);
    if d == a {
        println!("Correctly reused at {d:?}");
    } else {
        println!("Not correctly reused. A was at {a:?} and D is at {d:?}");
    }

    unsafe {
        allocator.free(c);
        allocator.free(d);
    }

    allocator.check_heap(true);
}
