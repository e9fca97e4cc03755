// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Ambient operation counters: a trait so a host application can
// plug in its own metrics sink, with a `Default`-constructible in-process
// counter set for everyone else. Kept deliberately small — this is the
// ambient accounting layer, not a metrics-export format.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter hooks invoked at each operation boundary in `ops.rs`.
pub trait StatsSink: Send + Sync {
    fn record_get(&self, _found: bool) {}
    fn record_put(&self) {}
    fn record_remove(&self) {}
    fn record_resize(&self) {}
    fn record_lock_timeout(&self) {}
    fn record_defrag_pass(&self, _moved: u64) {}
}

/// Plain atomic counters, sufficient for tests and simple embedders.
#[derive(Default)]
pub struct CountingStats {
    pub gets: AtomicU64,
    pub get_misses: AtomicU64,
    pub puts: AtomicU64,
    pub removes: AtomicU64,
    pub resizes: AtomicU64,
    pub lock_timeouts: AtomicU64,
    pub defrag_passes: AtomicU64,
    pub defrag_moved: AtomicU64,
}

impl StatsSink for CountingStats {
    fn record_get(&self, found: bool) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        if !found {
            self.get_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_resize(&self) {
        self.resizes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_defrag_pass(&self, moved: u64) {
        self.defrag_passes.fetch_add(1, Ordering::Relaxed);
        self.defrag_moved.fetch_add(moved, Ordering::Relaxed);
    }
}

/// A sink that discards everything; the default when a caller doesn't care.
#[derive(Default)]
pub struct NullStats;

impl StatsSink for NullStats {}
