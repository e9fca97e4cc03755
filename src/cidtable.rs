// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// CIDTable: the multi-level radix trie resolving a `Cid` to its chunk entry
// word. Five levels total: the node id (16 bits) dispatches into a per-node
// subtree, and the 48-bit local id is split into four 12-bit groups, each
// selecting a slot in one level of the trie. Every level below the leaves
// holds plain 64-bit child pointers (heap addresses); the leaf level holds
// the chunk entry words themselves.
//
// Intermediate table blocks are allocated lazily the first time a path
// through them is needed, published with a double-checked-locking pattern
// (compare `circ.rs`'s `constructed`/`init` idiom for on-demand shared-memory
// construction) — except the "checked" state here is a CAS on the
// child-pointer slot itself rather than a separate flag, since the heap
// gives us nothing to lock against the first writer race but the slot's
// own atomicity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cid::Cid;
use crate::entry::{EntryWord, LengthEncoding, INVALID_ADDRESS};
use crate::heap::Heap;
use crate::spin_lock::adaptive_yield_pub;
use crate::status::Status;

const NODE_BITS: u32 = 16;
const NODE_COUNT: usize = 1 << NODE_BITS;
const LEVEL_BITS: u32 = 12;
const LEVEL_COUNT: usize = 1 << LEVEL_BITS;
const LOCAL_LEVELS: u32 = 4; // 4 * 12 = 48 bits

/// Resolves CIDs to chunk entry words over a pre-reserved `Heap`. Holds the
/// heap by `Arc` (rather than a borrow) so a `DxMem` handle can own both the
/// heap and the table that indexes it without a self-referential lifetime.
pub struct CidTable {
    heap: Arc<Heap>,
    root: u64,
    /// Per-node id counters for `reserve_lid`. Ordinary process memory —
    /// only the trie itself lives off-heap.
    next_lid: Box<[AtomicU64]>,
}

impl CidTable {
    /// Build a new, empty table over `heap`. Allocates the root dispatch
    /// block (one child pointer per possible node id) immediately; every
    /// level below it is created on first use.
    pub fn new(heap: Arc<Heap>) -> Result<Self, crate::error::DxMemError> {
        let root = Self::new_table_block(&heap, NODE_COUNT, false)
            .map_err(|_| crate::error::DxMemError::InvalidConfig(
                "heap too small to hold the CIDTable root".into(),
            ))?;
        let next_lid = (0..NODE_COUNT).map(|_| AtomicU64::new(0)).collect();
        Ok(CidTable { heap, root, next_lid })
    }

    /// The heap this table resolves addresses over.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    fn new_table_block(heap: &Heap, entries: usize, leaf: bool) -> Result<u64, Status> {
        let addr = heap
            .alloc_raw(entries * 8)
            .ok_or(Status::OutOfMemory)?;
        if leaf {
            heap.zero_raw(addr, entries * 8); // FREE == 0
        } else {
            for i in 0..entries {
                heap.write_u64(addr + (i as u64) * 8, INVALID_ADDRESS).unwrap();
            }
        }
        Ok(addr)
    }

    /// Issue the next local id for `node_id`. Node-local, monotonically
    /// increasing; never reused, even across `remove`/zombie-reclaim, so a
    /// stale CID can never silently re-resolve to a different chunk.
    pub fn reserve_lid(&self, node_id: u16) -> Cid {
        let n = self.next_lid[node_id as usize].fetch_add(1, Ordering::Relaxed) + 1;
        debug_assert!(n < (1u64 << 48), "local id space exhausted for node {node_id}");
        Cid::new(node_id, n)
    }

    fn local_index(local: u64, level: u32) -> usize {
        // level 0 is the highest-order 12-bit group.
        let shift = (LOCAL_LEVELS - 1 - level) * LEVEL_BITS;
        ((local >> shift) & ((1u64 << LEVEL_BITS) - 1)) as usize
    }

    /// Walk (and, if `create_if_missing`, lazily build) the path from the
    /// root to `cid`'s leaf slot, returning that slot's heap address.
    pub fn translate(&self, cid: Cid, create_if_missing: bool) -> Result<u64, Status> {
        if cid.is_invalid() {
            return Err(Status::InvalidId);
        }
        let mut block = self.root;
        let mut index = cid.node_id() as usize;

        for level in 0..LOCAL_LEVELS {
            let is_last = level == LOCAL_LEVELS - 1;
            let slot_addr = block + (index as u64) * 8;
            let child = self.follow_or_create(slot_addr, is_last, create_if_missing)?;
            block = child;
            index = Self::local_index(cid.local_id(), level);
        }
        Ok(block + (index as u64) * 8)
    }

    /// Read the child pointer at `slot_addr`, creating it via DCLP if absent
    /// and `create_if_missing` is set.
    fn follow_or_create(&self, slot_addr: u64, next_is_leaf: bool, create_if_missing: bool) -> Result<u64, Status> {
        let atomic = unsafe { self.heap.atomic_u64_at(slot_addr) };
        let existing = atomic.load(Ordering::Acquire);
        if existing != INVALID_ADDRESS {
            return Ok(existing);
        }
        if !create_if_missing {
            return Err(Status::DoesNotExist);
        }
        let candidate = Self::new_table_block(&self.heap, LEVEL_COUNT, next_is_leaf)?;
        match atomic.compare_exchange(INVALID_ADDRESS, candidate, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Ok(candidate),
            Err(winner) => {
                // Lost the race: release our redundant block and use theirs.
                self.heap.free_raw(candidate, LEVEL_COUNT * 8);
                Ok(winner)
            }
        }
    }

    fn overflow_bytes_for(&self, word: EntryWord) -> Vec<u8> {
        let field = word.len_field();
        if field.embedded_total().is_some() {
            return Vec::new();
        }
        self.heap
            .overflow_bytes_for(word.address(), field.split_overflow_count())
    }

    /// Read the current entry for `cid` without modification.
    pub fn entry_reread(&self, cid: Cid) -> Result<crate::entry::WorkingEntry, Status> {
        let leaf_addr = self.translate(cid, false)?;
        let atomic = unsafe { self.heap.atomic_u64_at(leaf_addr) };
        let word = EntryWord::from_raw(atomic.load(Ordering::Acquire));
        let overflow = self.overflow_bytes_for(word);
        Ok(crate::entry::WorkingEntry::from_word(
            atomic as *const AtomicU64,
            word,
            &overflow,
        ))
    }

    /// Apply `f` to the current entry for `cid` and publish the result with
    /// a CAS retry loop. `f` returning `Err` aborts without retrying or
    /// mutating the slot. This is the single mutation primitive every other
    /// CIDTable/lock/ops.rs write goes through.
    pub fn entry_atomic_update<F>(
        &self,
        cid: Cid,
        create_if_missing: bool,
        mut f: F,
    ) -> Result<crate::entry::WorkingEntry, Status>
    where
        F: FnMut(&mut crate::entry::WorkingEntry) -> Result<(), Status>,
    {
        let leaf_addr = self.translate(cid, create_if_missing)?;
        let atomic = unsafe { self.heap.atomic_u64_at(leaf_addr) };
        let mut k = 0u32;
        loop {
            let raw = atomic.load(Ordering::Acquire);
            let word = EntryWord::from_raw(raw);
            let overflow = self.overflow_bytes_for(word);
            let mut working =
                crate::entry::WorkingEntry::from_word(atomic as *const AtomicU64, word, &overflow);
            f(&mut working)?;
            let new_word = working.get_value();
            if new_word.raw() == raw {
                working.commit();
                return Ok(working);
            }
            match atomic.compare_exchange_weak(raw, new_word.raw(), Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    working.commit();
                    return Ok(working);
                }
                Err(_) => adaptive_yield_pub(&mut k),
            }
        }
    }

    /// Insert a brand-new chunk's address/length into `cid`'s slot. The slot
    /// must currently be `FREE` or `ZOMBIE` (a fresh id, or one reclaimed by
    /// `cleanup_zombies`); anything else indicates a CID collision.
    pub fn insert(&self, cid: Cid, address: u64, length: LengthEncoding) -> Result<(), Status> {
        self.entry_atomic_update(cid, true, |w| {
            if w.initial_value().is_valid() {
                return Err(Status::InvalidId);
            }
            w.address = address;
            w.length = length;
            w.pinned = false;
            w.write_lock = false;
            w.read_lock = 0;
            Ok(())
        })
        .map(|_| ())
    }

    /// Mark `cid`'s slot as a zombie: retains the id against reuse until a
    /// later `cleanup_zombies` pass reclaims it.
    pub fn mark_zombie(&self, cid: Cid) -> Result<(), Status> {
        let leaf_addr = self.translate(cid, false)?;
        let atomic = unsafe { self.heap.atomic_u64_at(leaf_addr) };
        atomic.store(crate::entry::ZOMBIE, Ordering::Release);
        Ok(())
    }

    /// Reset every zombie leaf back to `FREE`, eagerly, as soon as observed
    /// (see DESIGN.md for the reclamation-policy rationale). Returns the
    /// number of slots reclaimed.
    pub fn cleanup_zombies(&self) -> usize {
        let mut reclaimed = 0usize;
        self.walk_leaves(|_cid, leaf_addr, word| {
            if word.is_zombie() {
                let atomic = unsafe { self.heap.atomic_u64_at(leaf_addr) };
                if atomic
                    .compare_exchange(
                        crate::entry::ZOMBIE,
                        crate::entry::FREE,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    reclaimed += 1;
                }
            }
        });
        reclaimed
    }

    /// Visit every currently-valid (non-free, non-zombie) entry. Used by the
    /// defragmenter pass and by export.
    pub fn for_each_valid<F: FnMut(Cid, EntryWord)>(&self, mut f: F) {
        self.walk_leaves(|cid, _addr, word| {
            if word.is_valid() {
                f(cid, word);
            }
        });
    }

    fn walk_leaves<F: FnMut(Cid, u64, EntryWord)>(&self, mut f: F) {
        for node in 0..NODE_COUNT {
            let l1 = self.heap.read_u64(self.root + (node as u64) * 8).unwrap();
            if l1 == INVALID_ADDRESS {
                continue;
            }
            self.walk_level(node as u16, l1, 0, 0, &mut f);
        }
    }

    fn walk_level<F: FnMut(Cid, u64, EntryWord)>(
        &self,
        node: u16,
        block: u64,
        level: u32,
        local_prefix: u64,
        f: &mut F,
    ) {
        for idx in 0..LEVEL_COUNT {
            let child_slot = block + (idx as u64) * 8;
            let raw = self.heap.read_u64(child_slot).unwrap();
            let shift = (LOCAL_LEVELS - 1 - level) * LEVEL_BITS;
            let local = local_prefix | ((idx as u64) << shift);
            if level == LOCAL_LEVELS - 1 {
                if raw == crate::entry::FREE {
                    continue;
                }
                f(Cid::new(node, local), child_slot, EntryWord::from_raw(raw));
            } else if raw != INVALID_ADDRESS {
                self.walk_level(node, raw, level + 1, local, f);
            }
        }
    }
}
