//! Example from the README.

use std::sync::mpsc;

use job_pool::JobPool;
use new_zealand::nz;

fn main() {
    testing::init_logging();

    let pool = JobPool::new(nz!(4), nz!(64));
    pool.start().unwrap();

    let (tx, rx) = mpsc::channel();

    for n in 1..=10_u64 {
        let tx = tx.clone();
        pool.push(move || tx.send(n * n).unwrap()).unwrap();
    }

    drop(tx);

    let sum: u64 = rx.iter().sum();
    println!("sum of squares: {sum}");

    pool.close();
}
