//! Example from the README.

use block_pool::BlockPool;

fn main() {
    let pool = BlockPool::new("framing");

    let block = pool.alloc(20);
    block.buffer().copy_from_slice(&[0xAA; 20]);

    // Hand a second reference to another consumer.
    let shared = block.retain();
    block.release();

    println!("{shared}");

    // The block returns to the pool here, when its last reference goes away.
    shared.release();

    let big = pool.alloc(300);
    println!("{big} pooled: {}", big.is_pooled());
}
