// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// A simple spin lock with adaptive backoff, used to serialize access to a
// single heap size-class's free list (`heap.rs`) and other short critical
// sections that are too fine-grained to route through the defragmenter
// barrier. Not used on the chunk-entry hot path — that path is pure CAS
// (see `lock.rs`).

use std::sync::atomic::{AtomicU32, Ordering};

/// Adaptive backoff: busy spin, then a CPU pause hint, then a thread yield,
/// then a short sleep. Matches the spin-with-yield discipline required of
/// every retry loop in this crate (critical sections are kept short enough
/// that a full OS wait is never warranted).
#[inline]
fn adaptive_yield(k: &mut u32) {
    if *k < 4 {
        // busy spin
    } else if *k < 16 {
        std::hint::spin_loop();
    } else if *k < 32 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(std::time::Duration::from_millis(1));
        return;
    }
    *k += 1;
}

/// Crate-internal access to the adaptive yield for other modules' own retry
/// loops (the lock protocol, the CIDTable CAS loops).
#[inline]
pub(crate) fn adaptive_yield_pub(k: &mut u32) {
    adaptive_yield(k);
}

/// A lock-free-acquire spin lock with adaptive backoff.
pub struct SpinLock {
    lc: AtomicU32,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            lc: AtomicU32::new(0),
        }
    }

    /// Acquire the lock, spinning with adaptive backoff.
    pub fn lock(&self) {
        let mut k = 0u32;
        while self.lc.swap(1, Ordering::Acquire) != 0 {
            adaptive_yield(&mut k);
        }
    }

    /// Release the lock.
    pub fn unlock(&self) {
        self.lc.store(0, Ordering::Release);
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for SpinLock {}
unsafe impl Sync for SpinLock {}
