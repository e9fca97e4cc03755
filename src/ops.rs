// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The operation layer: the public surface every embedder calls. Each
// operation enters the defragmenter barrier in shared ("application") mode
// before touching any entry, so a running `run_defrag_pass` can never
// observe (or race with) a concurrent get/put/resize/remove.
//
// Logging follows a `tracing::instrument` span at each public entry point,
// with payload bytes excluded from the span's captured arguments
// (`skip(...)`) since they carry no diagnostic value and may be large.

use std::sync::Arc;

use crate::barrier::{DefragBarrier, ExclusiveGuard, SharedGuard};
use crate::cid::Cid;
use crate::cidtable::CidTable;
use crate::config::DxMemConfig;
use crate::entry::WorkingEntry;
use crate::error::DxMemError;
use crate::heap::{Heap, HeapError};
use crate::lock::{acquire_read_lock, acquire_write_lock, release_read_lock, release_write_lock, Timeout};
use crate::stats::{NullStats, StatsSink};
use crate::status::Status;

fn heap_error_to_status(e: HeapError) -> Status {
    match e {
        HeapError::OutOfMemory => Status::OutOfMemory,
        HeapError::SizeTooLarge(_) => Status::OutOfMemory,
    }
}

/// An embeddable off-heap key/value memory manager.
pub struct DxMem {
    heap: Arc<Heap>,
    cidtable: CidTable,
    barrier: DefragBarrier,
    config: DxMemConfig,
    stats: Box<dyn StatsSink>,
}

impl DxMem {
    /// Build a new instance, reserving its heap immediately.
    pub fn new(config: DxMemConfig) -> Result<Self, DxMemError> {
        Self::with_stats(config, NullStats)
    }

    /// Build a new instance with a caller-supplied stats sink.
    pub fn with_stats(config: DxMemConfig, stats: impl StatsSink + 'static) -> Result<Self, DxMemError> {
        config.validate()?;
        let heap = Arc::new(Heap::reserve(config.heap_size_bytes)?);
        let cidtable = CidTable::new(Arc::clone(&heap))?;
        tracing::info!(heap_size = config.heap_size_bytes, node_id = config.node_id, "dxmem instance created");
        Ok(DxMem {
            heap,
            cidtable,
            barrier: DefragBarrier::new(),
            config,
            stats: Box::new(stats),
        })
    }

    /// Issue a fresh CID without backing it with any chunk yet. Pair with
    /// `create_reserved` to populate it later (e.g. when chunks reference
    /// each other and need ids up front).
    pub fn reserve(&self) -> Cid {
        self.cidtable.reserve_lid(self.config.node_id)
    }

    /// Issue `count` fresh CIDs in one call.
    pub fn reserve_batch(&self, count: usize) -> Vec<Cid> {
        (0..count).map(|_| self.reserve()).collect()
    }

    /// Allocate storage for `data` and bind it to a freshly issued CID.
    #[tracing::instrument(skip(self, data))]
    pub fn create(&self, data: &[u8]) -> Result<Cid, Status> {
        let cid = self.reserve();
        self.create_reserved(cid, data)?;
        Ok(cid)
    }

    /// Bind `data` to a CID previously returned by `reserve`. The CID's slot
    /// must still be `FREE` (never populated) or `ZOMBIE` (reclaimed).
    #[tracing::instrument(skip(self, data))]
    pub fn create_reserved(&self, cid: Cid, data: &[u8]) -> Result<(), Status> {
        let _guard = SharedGuard::new(&self.barrier);
        let (addr, length) = self.heap.alloc_chunk(data.len() as u64).map_err(heap_error_to_status)?;
        self.heap.write_bytes(addr, data);
        if let Err(e) = self.cidtable.insert(cid, addr, length) {
            self.heap.free_chunk(addr, &length);
            return Err(e);
        }
        self.stats.record_put();
        Ok(())
    }

    /// Bind each of `datas[i]` to `cids[i]`, all-or-nothing: if the heap
    /// cannot satisfy every allocation, or binding any CID fails, every
    /// allocation made by this call is freed and no CID is bound. `cids` and
    /// `datas` must be the same length — a caller passing unreserved or
    /// mismatched CIDs here is a programmer error, not a recoverable one.
    #[tracing::instrument(skip(self, cids, datas))]
    pub fn create_reserved_batch(&self, cids: &[Cid], datas: &[&[u8]]) -> Result<(), Status> {
        debug_assert_eq!(cids.len(), datas.len(), "cids and datas must have matching length");
        let _guard = SharedGuard::new(&self.barrier);
        let sizes: Vec<u64> = datas.iter().map(|d| d.len() as u64).collect();
        let allocations = self.heap.malloc_batch(&sizes).map_err(heap_error_to_status)?;

        for i in 0..datas.len() {
            let (addr, _) = allocations[i];
            self.heap.write_bytes(addr, datas[i]);
        }

        for i in 0..cids.len() {
            let (addr, length) = allocations[i];
            if let Err(e) = self.cidtable.insert(cids[i], addr, length) {
                for (j, (addr2, length2)) in allocations.iter().enumerate() {
                    if j < i {
                        let _ = self.cidtable.mark_zombie(cids[j]);
                    }
                    self.heap.free_chunk(*addr2, length2);
                }
                return Err(e);
            }
        }
        self.stats.record_put();
        Ok(())
    }

    /// Read a copy of the chunk bound to `cid`, waiting up to `timeout_ms`
    /// for its read lock (negative blocks forever, zero tries once).
    #[tracing::instrument(skip(self))]
    pub fn get(&self, cid: Cid, timeout_ms: i64) -> Result<Vec<u8>, Status> {
        let _guard = SharedGuard::new(&self.barrier);
        let entry = acquire_read_lock(&self.cidtable, cid, Timeout::from_millis(timeout_ms))?;
        let bytes = self.heap.read_bytes(entry.address, entry.length.total() as usize).map(<[u8]>::to_vec);
        let _ = release_read_lock(&self.cidtable, cid);
        self.stats.record_get(bytes.is_some());
        bytes.ok_or(Status::DoesNotExist)
    }

    /// Overwrite the chunk bound to `cid`, resizing its storage if `data`'s
    /// length differs from the current chunk length, waiting up to
    /// `timeout_ms` for its write lock.
    #[tracing::instrument(skip(self, data))]
    pub fn put(&self, cid: Cid, data: &[u8], timeout_ms: i64) -> Result<(), Status> {
        let _guard = SharedGuard::new(&self.barrier);
        let entry = acquire_write_lock(&self.cidtable, cid, Timeout::from_millis(timeout_ms))?;
        let new_total = data.len() as u64;
        let write_result = if new_total == entry.length.total() {
            self.heap.write_bytes(entry.address, data);
            Ok(())
        } else {
            self.relocate_and_write(cid, &entry, new_total, Some(data))
        };
        let _ = release_write_lock(&self.cidtable, cid);
        write_result?;
        self.stats.record_put();
        Ok(())
    }

    /// Change the chunk bound to `cid` to `new_len` bytes, preserving as
    /// many leading bytes as fit, waiting up to `timeout_ms` for its write
    /// lock. Growth zero-extends; shrink truncates.
    #[tracing::instrument(skip(self))]
    pub fn resize(&self, cid: Cid, new_len: u64, timeout_ms: i64) -> Result<(), Status> {
        let _guard = SharedGuard::new(&self.barrier);
        let entry = acquire_write_lock(&self.cidtable, cid, Timeout::from_millis(timeout_ms))?;
        let result = if new_len == entry.length.total() {
            Ok(())
        } else {
            self.relocate_and_write(cid, &entry, new_len, None)
        };
        let _ = release_write_lock(&self.cidtable, cid);
        result?;
        self.stats.record_resize();
        Ok(())
    }

    /// Move `entry`'s storage to a block sized for `new_total` bytes and
    /// publish the new address/length, optionally overwriting the payload
    /// with `data` (used by `put`'s resizing path; `None` preserves the
    /// copied-forward bytes as `resize_chunk` leaves them).
    fn relocate_and_write(
        &self,
        cid: Cid,
        entry: &WorkingEntry,
        new_total: u64,
        data: Option<&[u8]>,
    ) -> Result<(), Status> {
        let (addr, length) = self
            .heap
            .resize_chunk(entry.address, &entry.length, new_total)
            .map_err(heap_error_to_status)?;
        if let Some(data) = data {
            self.heap.write_bytes(addr, data);
        }
        self.cidtable
            .entry_atomic_update(cid, false, |w| {
                w.address = addr;
                w.length = length;
                Ok(())
            })
            .map(|_| ())
    }

    /// Remove the chunk bound to `cid`, freeing its storage and retaining
    /// the id as a zombie against reuse, waiting up to `timeout_ms` for its
    /// write lock.
    #[tracing::instrument(skip(self))]
    pub fn remove(&self, cid: Cid, timeout_ms: i64) -> Result<(), Status> {
        let _guard = SharedGuard::new(&self.barrier);
        let entry = acquire_write_lock(&self.cidtable, cid, Timeout::from_millis(timeout_ms))?;
        self.heap.free_chunk(entry.address, &entry.length);
        self.cidtable.mark_zombie(cid)?;
        self.stats.record_remove();
        Ok(())
    }

    /// Mark `cid` immovable by the defragmenter.
    pub fn pin(&self, cid: Cid) -> Result<(), Status> {
        let _guard = SharedGuard::new(&self.barrier);
        self.cidtable
            .entry_atomic_update(cid, false, |w| {
                if !w.initial_value().is_valid() {
                    return Err(Status::DoesNotExist);
                }
                w.pinned = true;
                Ok(())
            })
            .map(|_| ())
    }

    /// Clear a previous `pin`.
    pub fn unpin(&self, cid: Cid) -> Result<(), Status> {
        let _guard = SharedGuard::new(&self.barrier);
        self.cidtable
            .entry_atomic_update(cid, false, |w| {
                if !w.initial_value().is_valid() {
                    return Err(Status::DoesNotExist);
                }
                w.pinned = false;
                Ok(())
            })
            .map(|_| ())
    }

    /// Whether `cid` currently resolves to a live chunk.
    pub fn exists(&self, cid: Cid) -> bool {
        let _guard = SharedGuard::new(&self.barrier);
        self.cidtable
            .entry_reread(cid)
            .map(|e| e.initial_value().is_valid())
            .unwrap_or(false)
    }

    /// The length, in bytes, of the chunk bound to `cid`.
    pub fn size(&self, cid: Cid) -> Result<u64, Status> {
        let _guard = SharedGuard::new(&self.barrier);
        let entry = self.cidtable.entry_reread(cid)?;
        if !entry.initial_value().is_valid() {
            return Err(Status::DoesNotExist);
        }
        Ok(entry.length.total())
    }

    /// Run one defragmenter pass: relocates movable chunks to compact the
    /// heap, excluding all application-mode operations for its duration.
    #[tracing::instrument(skip(self))]
    pub fn run_defrag_pass(&self) -> usize {
        let _guard = ExclusiveGuard::new(&self.barrier);
        let moved = crate::defrag::run_pass(&self.heap, &self.cidtable);
        self.stats.record_defrag_pass(moved as u64);
        moved
    }

    /// Direct access to the heap, for `codec`'s export path.
    pub(crate) fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Direct access to the CID table, for `codec`'s export path.
    pub(crate) fn cidtable(&self) -> &CidTable {
        &self.cidtable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dxmem(mb: usize) -> DxMem {
        DxMem::new(DxMemConfig {
            heap_size_bytes: mb * 1024 * 1024,
            node_id: 1,
            default_lock_timeout_ms: 0,
            defrag_min_free_ratio: 0.25,
        })
        .unwrap()
    }

    #[test]
    fn create_then_get_round_trips_payload() {
        let mem = dxmem(4);
        let cid = mem.create(b"hello dxmem").unwrap();
        assert_eq!(mem.get(cid, 0).unwrap(), b"hello dxmem");
        assert_eq!(mem.size(cid).unwrap(), 11);
        assert!(mem.exists(cid));
    }

    #[test]
    fn put_with_same_length_overwrites_in_place() {
        let mem = dxmem(4);
        let cid = mem.create(b"aaaaa").unwrap();
        mem.put(cid, b"bbbbb", 0).unwrap();
        assert_eq!(mem.get(cid, 0).unwrap(), b"bbbbb");
    }

    #[test]
    fn put_with_different_length_relocates() {
        let mem = dxmem(4);
        let cid = mem.create(b"short").unwrap();
        let long = vec![0x42u8; 4096];
        mem.put(cid, &long, 0).unwrap();
        assert_eq!(mem.get(cid, 0).unwrap(), long);
    }

    #[test]
    fn resize_grows_and_preserves_prefix() {
        let mem = dxmem(4);
        let cid = mem.create(b"prefix").unwrap();
        mem.resize(cid, 100, 0).unwrap();
        assert_eq!(mem.size(cid).unwrap(), 100);
        assert_eq!(&mem.get(cid, 0).unwrap()[..6], b"prefix");
    }

    #[test]
    fn remove_then_get_reports_does_not_exist() {
        let mem = dxmem(4);
        let cid = mem.create(b"gone soon").unwrap();
        mem.remove(cid, 0).unwrap();
        assert_eq!(mem.get(cid, 0).unwrap_err(), Status::DoesNotExist);
        assert!(!mem.exists(cid));
    }

    #[test]
    fn reserve_then_create_reserved_binds_payload() {
        let mem = dxmem(4);
        let cid = mem.reserve();
        assert!(!mem.exists(cid));
        mem.create_reserved(cid, b"late binding").unwrap();
        assert_eq!(mem.get(cid, 0).unwrap(), b"late binding");
    }

    #[test]
    fn reserve_batch_then_create_reserved_batch_binds_all_or_nothing() {
        let mem = dxmem(4);
        let cids = mem.reserve_batch(3);
        let datas: Vec<&[u8]> = vec![&[0u8; 16], &[1u8; 32], &[2u8; 64]];
        mem.create_reserved_batch(&cids, &datas).unwrap();

        assert_eq!(mem.size(cids[0]).unwrap(), 16);
        assert_eq!(mem.size(cids[1]).unwrap(), 32);
        assert_eq!(mem.size(cids[2]).unwrap(), 64);

        mem.remove(cids[1], 0).unwrap();
        assert!(!mem.exists(cids[1]));
        assert!(mem.exists(cids[0]));
    }

    #[test]
    fn create_reserved_batch_rolls_back_on_oversized_request() {
        let mem = dxmem(1);
        let cids = mem.reserve_batch(2);
        let huge = vec![0u8; 16 * 1024 * 1024];
        let datas: Vec<&[u8]> = vec![&[1u8; 16], &huge];
        let err = mem.create_reserved_batch(&cids, &datas).unwrap_err();
        assert_eq!(err, Status::OutOfMemory);
        assert!(!mem.exists(cids[0]));
        assert!(!mem.exists(cids[1]));
    }

    #[test]
    fn pin_blocks_nothing_at_the_ops_layer_but_is_observable() {
        let mem = dxmem(4);
        let cid = mem.create(b"pinned").unwrap();
        mem.pin(cid).unwrap();
        mem.unpin(cid).unwrap();
        assert_eq!(mem.get(cid, 0).unwrap(), b"pinned");
    }

    #[test]
    fn operations_on_unknown_cid_report_does_not_exist() {
        let mem = dxmem(4);
        let cid = Cid::new(1, 9999);
        assert_eq!(mem.get(cid, 0).unwrap_err(), Status::DoesNotExist);
        assert_eq!(mem.put(cid, b"x", 0).unwrap_err(), Status::DoesNotExist);
        assert_eq!(mem.remove(cid, 0).unwrap_err(), Status::DoesNotExist);
        assert_eq!(mem.size(cid).unwrap_err(), Status::DoesNotExist);
    }

    #[test]
    fn run_defrag_pass_does_not_disturb_live_data() {
        let mem = dxmem(4);
        let cid = mem.create(b"stable").unwrap();
        mem.run_defrag_pass();
        assert_eq!(mem.get(cid, 0).unwrap(), b"stable");
    }

    #[test]
    fn put_times_out_against_a_held_read_lock() {
        let mem = dxmem(4);
        let cid = mem.create(&vec![0u8; 100]).unwrap();

        acquire_read_lock(&mem.cidtable, cid, Timeout::OneShot).unwrap();
        let err = mem.put(cid, &vec![1u8; 100], 10).unwrap_err();
        assert_eq!(err, Status::LockTimeout);
        release_read_lock(&mem.cidtable, cid).unwrap();

        mem.put(cid, &vec![2u8; 100], -1).unwrap();
        assert_eq!(mem.get(cid, -1).unwrap(), vec![2u8; 100]);
    }
}
