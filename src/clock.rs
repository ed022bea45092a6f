//! Monotonic time and execution-context identity for record headers.
//!
//! These avoid locks and, after the first call on a thread, heap allocation,
//! so they stay usable from the crash path.

use std::cell::Cell;
use std::hash::{DefaultHasher, Hash, Hasher};

thread_local! {
    static THREAD_HASH: Cell<u64> = const { Cell::new(0) };
}

/// Nanoseconds on the monotonic clock.
///
/// On unix this is `CLOCK_MONOTONIC`, whose epoch is fixed for the lifetime of
/// the system (typically boot). Elsewhere the epoch is the first call in the
/// process.
#[inline]
pub fn now_ns() -> u64 {
    #[cfg(unix)]
    {
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        // SAFETY: `ts` is a valid, writable timespec.
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        if rc == 0 {
            return (ts.tv_sec as u64)
                .wrapping_mul(1_000_000_000)
                .wrapping_add(ts.tv_nsec as u64);
        }
        fallback_ns()
    }

    #[cfg(not(unix))]
    {
        fallback_ns()
    }
}

fn fallback_ns() -> u64 {
    lazy_static::lazy_static! {
        static ref EPOCH: std::time::Instant = std::time::Instant::now();
    }
    EPOCH.elapsed().as_nanos() as u64
}

/// Stable hash of the calling thread's identity, cached per thread.
#[inline]
pub fn thread_hash() -> u64 {
    THREAD_HASH.with(|cached| {
        let value = cached.get();
        if value != 0 {
            return value;
        }
        let value = compute_thread_hash();
        cached.set(value);
        value
    })
}

#[cold]
fn compute_thread_hash() -> u64 {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    // Zero marks "not computed yet".
    hasher.finish().max(1)
}

/// Id of the current process.
#[inline]
pub fn process_id() -> u32 {
    std::process::id()
}
