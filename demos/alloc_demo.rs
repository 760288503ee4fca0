extern crate tagmalloc;

use tagmalloc::{TagMalloc, NIL};

fn main() {
    let mut a = TagMalloc::new();
    println!(
        "heap ready: [{}, {}), first block at {}",
        a.heap().start(),
        a.heap().end(),
        a.heap().first_block()
    );

    let small = a.alloc(4);
    let mid = a.alloc(100);
    let big = a.alloc(2000);
    println!("alloc 4 -> {}, alloc 100 -> {}, alloc 2000 -> {}", small, mid, big);
    println!("allocated bytes: {}", a.allocated_bytes());

    a.free(mid);
    println!("freed the middle block; allocated bytes: {}", a.allocated_bytes());

    // a request the cap cannot satisfy is refused with NIL
    let huge = a.alloc(30 * 1024);
    assert_eq!(huge, NIL);
    println!("alloc 30 KiB -> NIL (heap cap is 32 KiB)");

    a.free(small);
    a.free(big);
    println!(
        "all freed; heap collapses to one {}-byte free block",
        a.heap().block_size(a.heap().first_block())
    );
}
