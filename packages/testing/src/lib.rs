#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing and examples in the pool packages.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

/// Runs a test with a timeout to prevent infinite hangs.
///
/// If the test takes longer than the timeout to complete, the test fails instead of hanging
/// the CI/build system. The timeout is 10 seconds under normal conditions and 60 seconds
/// under Miri, where thread synchronization primitives are significantly slower.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled
/// and the test function is executed directly, so mutation testing can detect hanging
/// mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode).
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the receiver has already timed out.
        drop(tx.send(result));
    });

    let timeout = patience();

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("Test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("Test exceeded {}-second timeout", timeout.as_secs());
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("Test thread disconnected unexpectedly"),
            Err(e) => std::panic::resume_unwind(e),
        },
    }
}

/// Polls `condition` until it returns `true`.
///
/// Used to wait for work that happens on background threads the caller has no handle to
/// join. The condition is re-checked every millisecond.
///
/// # Panics
///
/// Panics if the condition is still `false` after the same timeout that [`with_watchdog()`]
/// applies, so a test that waits for something that never happens fails with a clear message.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::thread;
///
/// use testing::eventually;
///
/// let done = Arc::new(AtomicBool::new(false));
///
/// thread::spawn({
///     let done = Arc::clone(&done);
///     move || done.store(true, Ordering::Release)
/// });
///
/// eventually(|| done.load(Ordering::Acquire));
/// ```
pub fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now()
        .checked_add(patience())
        .expect("deadline is in the representable future");

    while !condition() {
        assert!(
            Instant::now() < deadline,
            "condition did not become true within {} seconds",
            patience().as_secs()
        );

        thread::sleep(Duration::from_millis(1));
    }
}

/// Installs a `tracing` subscriber that prints to stderr, filtered by `RUST_LOG`.
///
/// Meant for examples and ad-hoc debugging. Defaults to the `info` level when `RUST_LOG` is not
/// set. Calling this more than once is harmless - only the first subscriber is installed.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Fails only if a subscriber is already installed, which is fine.
    drop(
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    );
}

// Miri is dramatically slower for thread synchronization, so it gets a longer timeout to avoid
// false positives while still catching real hangs.
fn patience() -> Duration {
    if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    }
}
