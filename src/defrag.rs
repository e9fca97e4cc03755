// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The defragmenter pass: relocate every unpinned live chunk to
// a freshly allocated block, freeing its old storage once the CID table
// points at the new one. Runs only while `DefragBarrier` is held in
// exclusive mode (`DxMem::run_defrag_pass`), so there is no concurrent
// application-thread traffic to race against — each relocation is a plain
// sequential alloc/copy/publish/free rather than a CAS retry loop.
//
// What region-selection heuristic decides which chunks are worth moving
// (e.g. only ones in a fragmented low-occupancy range) is left to the
// caller's pacing of `run_defrag_pass`; this pass itself relocates
// everything eligible, once.

use crate::cid::Cid;
use crate::cidtable::CidTable;
use crate::heap::Heap;

/// Run one compaction pass. Returns the number of chunks relocated.
pub fn run_pass(heap: &Heap, cidtable: &CidTable) -> usize {
    let mut candidates: Vec<Cid> = Vec::new();
    cidtable.for_each_valid(|cid, word| {
        if !word.pinned() {
            candidates.push(cid);
        }
    });

    let mut moved = 0usize;
    for cid in candidates {
        let entry = match cidtable.entry_reread(cid) {
            Ok(e) => e,
            Err(_) => continue,
        };
        if entry.pinned || !entry.initial_value().is_valid() {
            continue;
        }

        let total = entry.length.total();
        let (new_addr, new_length) = match heap.alloc_chunk(total) {
            Ok(v) => v,
            Err(_) => continue, // heap too full to relocate; leave it in place
        };
        heap.move_payload(entry.address, new_addr, total as usize);

        let old_address = entry.address;
        let old_length = entry.length;
        match cidtable.entry_atomic_update(cid, false, |w| {
            w.address = new_addr;
            w.length = new_length;
            Ok(())
        }) {
            Ok(_) => {
                heap.free_chunk(old_address, &old_length);
                moved += 1;
            }
            Err(_) => {
                // Should not happen under the exclusive barrier; undo the
                // speculative allocation rather than leak it.
                heap.free_chunk(new_addr, &new_length);
            }
        }
    }
    tracing::debug!(moved, "defragmenter pass complete");
    moved
}
