// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The per-chunk reader/writer lock protocol: unlike the defragmenter
// barrier (`barrier.rs`), this lock's state lives inside the chunk's own
// entry word (the `read_lock`/`write_lock` bit fields from `entry.rs`), so
// acquiring it is a CAS retry loop through `CidTable::entry_atomic_update`
// rather than a dedicated atomic.
//
// Timeout handling follows the same three-way contract as this codebase's
// other wait primitives: a negative budget blocks forever, zero tries
// exactly once, and a positive budget is a millisecond deadline checked
// against a monotonic clock between spin attempts.

use std::time::{Duration, Instant};

use crate::cid::Cid;
use crate::cidtable::CidTable;
use crate::entry::WorkingEntry;
use crate::spin_lock::adaptive_yield_pub;
use crate::status::Status;

/// How long a lock acquisition should wait before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Retry until the lock is acquired.
    Infinite,
    /// Try exactly once; fail immediately if unavailable.
    OneShot,
    /// Retry for up to this many milliseconds.
    Millis(u32),
}

impl Timeout {
    /// Convert a caller-supplied millisecond budget into a `Timeout`:
    /// negative blocks forever, zero tries exactly once, positive is a
    /// millisecond deadline.
    pub fn from_millis(ms: i64) -> Timeout {
        match ms {
            i if i < 0 => Timeout::Infinite,
            0 => Timeout::OneShot,
            ms => Timeout::Millis(ms as u32),
        }
    }

    fn deadline(self) -> Option<Instant> {
        match self {
            Timeout::Infinite => None,
            Timeout::OneShot => Some(Instant::now()),
            Timeout::Millis(ms) => Some(Instant::now() + Duration::from_millis(ms as u64)),
        }
    }

    fn expired(deadline: Option<Instant>) -> bool {
        matches!(deadline, Some(d) if Instant::now() >= d)
    }
}

/// Acquire a shared (read) lock on `cid`'s entry. Fails with
/// `Status::DoesNotExist` if the id does not resolve to a live chunk, and
/// with `Status::LockTimeout` if the budget expires before a slot opens up
/// (a live writer, or all 127 reader slots already in use).
pub fn acquire_read_lock(cidtable: &CidTable, cid: Cid, timeout: Timeout) -> Result<WorkingEntry, Status> {
    let deadline = timeout.deadline();
    let mut k = 0u32;
    loop {
        let result = cidtable.entry_atomic_update(cid, false, |w| {
            if !w.initial_value().is_valid() {
                return Err(Status::DoesNotExist);
            }
            if w.write_lock || w.read_lock >= crate::entry::MAX_READERS {
                return Err(Status::LockTimeout); // retried below, not surfaced yet
            }
            w.read_lock += 1;
            Ok(())
        });
        match result {
            Ok(entry) => return Ok(entry),
            Err(Status::DoesNotExist) => return Err(Status::DoesNotExist),
            Err(_) => {
                if Timeout::expired(deadline) {
                    return Err(Status::LockTimeout);
                }
                adaptive_yield_pub(&mut k);
            }
        }
    }
}

/// Release a previously-acquired read lock.
pub fn release_read_lock(cidtable: &CidTable, cid: Cid) -> Result<WorkingEntry, Status> {
    cidtable.entry_atomic_update(cid, false, |w| {
        debug_assert!(w.read_lock > 0, "release_read_lock without a held reader slot");
        w.read_lock = w.read_lock.saturating_sub(1);
        Ok(())
    })
}

/// Acquire an exclusive (write) lock on `cid`'s entry: requires zero active
/// readers and no other writer.
pub fn acquire_write_lock(cidtable: &CidTable, cid: Cid, timeout: Timeout) -> Result<WorkingEntry, Status> {
    let deadline = timeout.deadline();
    let mut k = 0u32;
    loop {
        let result = cidtable.entry_atomic_update(cid, false, |w| {
            if !w.initial_value().is_valid() {
                return Err(Status::DoesNotExist);
            }
            if w.write_lock || w.read_lock > 0 {
                return Err(Status::LockTimeout);
            }
            w.write_lock = true;
            Ok(())
        });
        match result {
            Ok(entry) => return Ok(entry),
            Err(Status::DoesNotExist) => return Err(Status::DoesNotExist),
            Err(_) => {
                if Timeout::expired(deadline) {
                    return Err(Status::LockTimeout);
                }
                adaptive_yield_pub(&mut k);
            }
        }
    }
}

/// Release a previously-acquired write lock.
pub fn release_write_lock(cidtable: &CidTable, cid: Cid) -> Result<WorkingEntry, Status> {
    cidtable.entry_atomic_update(cid, false, |w| {
        debug_assert!(w.write_lock, "release_write_lock without a held writer");
        w.write_lock = false;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;
    use std::sync::Arc;

    fn setup(mb: usize) -> (Arc<Heap>, CidTable) {
        let heap = Arc::new(Heap::reserve(mb * 1024 * 1024).unwrap());
        let cidtable = CidTable::new(Arc::clone(&heap)).unwrap();
        (heap, cidtable)
    }

    #[test]
    fn read_lock_round_trip() {
        let (heap, cidtable) = setup(4);
        let cid = cidtable.reserve_lid(1);
        let (addr, length) = heap.alloc_chunk(16).unwrap();
        cidtable.insert(cid, addr, length).unwrap();

        let entry = acquire_read_lock(&cidtable, cid, Timeout::OneShot).unwrap();
        assert_eq!(entry.read_lock, 1);
        release_read_lock(&cidtable, cid).unwrap();
        let entry = cidtable.entry_reread(cid).unwrap();
        assert_eq!(entry.read_lock, 0);
    }

    #[test]
    fn write_lock_excludes_read_lock() {
        let (heap, cidtable) = setup(4);
        let cid = cidtable.reserve_lid(1);
        let (addr, length) = heap.alloc_chunk(16).unwrap();
        cidtable.insert(cid, addr, length).unwrap();

        acquire_write_lock(&cidtable, cid, Timeout::OneShot).unwrap();
        let err = acquire_read_lock(&cidtable, cid, Timeout::OneShot).unwrap_err();
        assert_eq!(err, Status::LockTimeout);
        release_write_lock(&cidtable, cid).unwrap();
        acquire_read_lock(&cidtable, cid, Timeout::OneShot).unwrap();
    }

    #[test]
    fn multiple_readers_allowed_concurrently() {
        let (heap, cidtable) = setup(4);
        let cid = cidtable.reserve_lid(1);
        let (addr, length) = heap.alloc_chunk(16).unwrap();
        cidtable.insert(cid, addr, length).unwrap();

        acquire_read_lock(&cidtable, cid, Timeout::OneShot).unwrap();
        let second = acquire_read_lock(&cidtable, cid, Timeout::OneShot).unwrap();
        assert_eq!(second.read_lock, 2);
    }

    #[test]
    fn lock_on_missing_id_reports_does_not_exist() {
        let (_heap, cidtable) = setup(4);
        let cid = Cid::new(1, 999);
        let err = acquire_read_lock(&cidtable, cid, Timeout::OneShot).unwrap_err();
        assert_eq!(err, Status::DoesNotExist);
    }

    #[test]
    fn one_shot_timeout_fails_immediately_under_contention() {
        let (heap, cidtable) = setup(4);
        let cid = cidtable.reserve_lid(1);
        let (addr, length) = heap.alloc_chunk(16).unwrap();
        cidtable.insert(cid, addr, length).unwrap();

        acquire_write_lock(&cidtable, cid, Timeout::OneShot).unwrap();
        let start = Instant::now();
        let err = acquire_write_lock(&cidtable, cid, Timeout::OneShot).unwrap_err();
        assert_eq!(err, Status::LockTimeout);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn millis_timeout_succeeds_once_writer_releases() {
        let (heap, cidtable) = setup(4);
        let cid = cidtable.reserve_lid(1);
        let (addr, length) = heap.alloc_chunk(16).unwrap();
        cidtable.insert(cid, addr, length).unwrap();

        acquire_write_lock(&cidtable, cid, Timeout::OneShot).unwrap();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(Duration::from_millis(20));
                release_write_lock(&cidtable, cid).unwrap();
            });
            let entry = acquire_write_lock(&cidtable, cid, Timeout::Millis(500)).unwrap();
            assert!(entry.write_lock);
        });
    }
}
