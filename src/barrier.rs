// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The defragmenter barrier: a two-mode gate separating application-thread
// operations (shared "application mode") from a compaction pass (exclusive
// "defragmenter mode"). Built on the same single-word atomic reader/writer
// scheme as the entry lock protocol (`lock.rs`), but as a standalone
// `AtomicU32` rather than bits of a chunk entry, since the barrier has no
// associated heap address or length.
//
// Writer priority falls out of `enter_shared`'s own structure: once a
// defragmenter pass has set the write flag, new shared acquirers spin
// behind it instead of being able to keep slipping in ahead of it, which is
// what prevents the defragmenter from starving under steady application
// load.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::spin_lock::adaptive_yield_pub;

const W_MASK: u32 = i32::MAX as u32; // reader count mask
const W_FLAG: u32 = W_MASK + 1; // exclusive-mode flag

/// Application-mode (shared) vs. defragmenter-mode (exclusive) gate.
pub struct DefragBarrier {
    lc: AtomicU32,
}

impl DefragBarrier {
    pub const fn new() -> Self {
        Self {
            lc: AtomicU32::new(0),
        }
    }

    /// Enter defragmenter mode (exclusive). Blocks until no application
    /// thread holds the barrier and no other defragmenter pass is running.
    pub fn enter_exclusive(&self) {
        let mut k = 0u32;
        loop {
            let old = self.lc.fetch_or(W_FLAG, Ordering::AcqRel);
            if old == 0 {
                return; // acquired with no shared holders
            }
            if old & W_FLAG == 0 {
                break; // shared holders present but no other writer — drain them
            }
            adaptive_yield_pub(&mut k); // another defrag pass holds it
        }
        let mut k = 0u32;
        while self.lc.load(Ordering::Acquire) & W_MASK != 0 {
            adaptive_yield_pub(&mut k);
        }
    }

    /// Leave defragmenter mode.
    pub fn exit_exclusive(&self) {
        self.lc.store(0, Ordering::Release);
    }

    /// Enter application mode (shared). Spins while a defragmenter pass is
    /// active so that a waiting exclusive acquirer is not overtaken by a
    /// continuous stream of new shared acquirers.
    pub fn enter_shared(&self) {
        let mut old = self.lc.load(Ordering::Acquire);
        let mut k = 0u32;
        loop {
            if old & W_FLAG != 0 {
                adaptive_yield_pub(&mut k);
                old = self.lc.load(Ordering::Acquire);
            } else if self
                .lc
                .compare_exchange_weak(old, old + 1, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            } else {
                old = self.lc.load(Ordering::Acquire);
            }
        }
    }

    /// Leave application mode.
    pub fn exit_shared(&self) {
        self.lc.fetch_sub(1, Ordering::Release);
    }
}

impl Default for DefragBarrier {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for DefragBarrier {}
unsafe impl Sync for DefragBarrier {}

/// RAII guard for `enter_shared`/`exit_shared`.
pub struct SharedGuard<'a>(&'a DefragBarrier);

impl<'a> SharedGuard<'a> {
    pub fn new(barrier: &'a DefragBarrier) -> Self {
        barrier.enter_shared();
        SharedGuard(barrier)
    }
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        self.0.exit_shared();
    }
}

/// RAII guard for `enter_exclusive`/`exit_exclusive`.
pub struct ExclusiveGuard<'a>(&'a DefragBarrier);

impl<'a> ExclusiveGuard<'a> {
    pub fn new(barrier: &'a DefragBarrier) -> Self {
        barrier.enter_exclusive();
        ExclusiveGuard(barrier)
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.0.exit_exclusive();
    }
}
