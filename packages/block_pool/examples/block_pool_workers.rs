//! Shares one block pool between the workers of a job pool.
//!
//! Each job frames a message into a pooled block and releases it when done. Run with
//! `RUST_LOG=block_pool=trace,job_pool=debug` to watch size classes being replenished.

use std::sync::{Arc, mpsc};

use block_pool::BlockPool;
use job_pool::JobPool;
use new_zealand::nz;

const MESSAGES: usize = 1000;

fn main() {
    testing::init_logging();

    let pool = Arc::new(BlockPool::new("messages"));
    let jobs = JobPool::new(nz!(4), nz!(64));
    jobs.start().unwrap();

    let (done_tx, done_rx) = mpsc::channel();

    for index in 0..MESSAGES {
        let pool = Arc::clone(&pool);
        let done_tx = done_tx.clone();

        jobs.push(move || {
            let payload = format!("message #{index}");

            // Two length bytes followed by the payload.
            let block = pool.alloc(payload.len() + 2);
            {
                let mut buffer = block.buffer();
                let (header, body) = buffer.split_at_mut(2);
                header.copy_from_slice(&u16::try_from(payload.len()).unwrap().to_be_bytes());
                body.copy_from_slice(payload.as_bytes());
            }

            done_tx.send(block.len()).unwrap();
        })
        .unwrap();
    }

    drop(done_tx);

    let framed_bytes: usize = done_rx.iter().sum();
    jobs.close();

    println!("framed {MESSAGES} messages, {framed_bytes} bytes in total");
    println!();
    println!("{pool}");
}
