//! Installs [`TagAlloc`] as the global allocator, so that `Box`, `Vec` and
//! `String` all live in the process wide heap.

use std::thread;

use tagalloc::global::{self, TagAlloc};

#[global_allocator]
static ALLOCATOR: TagAlloc = TagAlloc;

fn main() {
    let val_box = Box::new(22);
    println!("Box Value: {val_box}, At: {val_box:p}");

    let mut v = Vec::new();
    for i in 0..5 {
        v.push(i * 10);
        println!("Added {}; Capacity: {}; At: {:p}", v[i], v.capacity(), v.as_ptr());
    }

    let msg = String::from("Heap Testing");
    println!("\nString '{msg}' - At: {:p}", msg.as_ptr());

    let a = Box::new([0u8; 64]);
    let b = Box::new([0u8; 64]);
    let ptr_a = a.as_ptr();

    drop(a);
    drop(b);

    let c = Box::new([0u8; 128]);
    println!("A was at {ptr_a:p}, C is at {:p}", c.as_ptr());

    let workers: Vec<_> = (0..2)
        .map(|i| thread::spawn(move || Box::new(i * 111)))
        .collect();

    for worker in workers {
        let value = worker.join().expect("worker panicked");
        println!("Worker value {value} at {value:p}");
    }

    println!("{:?}", global::validate());
}
