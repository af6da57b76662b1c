use std::ptr::NonNull;

use tagalloc::Allocator;

fn log_alloc(addr: Option<NonNull<u8>>, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    env_logger::init();

    let mut allocator = Allocator::new().expect("could not reserve the heap");

    let addr1 = allocator.allocate(8);
    log_alloc(addr1, 8);

    let addr2 = allocator.allocate(64);
    log_alloc(addr2, 64);

    let addr3 = allocator.zero_allocate(4, 16);
    log_alloc(addr3, 64);

    unsafe {
        let addr4 = allocator.resize(addr2, 256);
        log_alloc(addr4, 256);

        allocator.free(addr1);
        allocator.free(addr3);
        allocator.free(addr4);
    }

    allocator.check_heap(true);
}
