// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The chunk entry word: a single 64-bit value that is the pivot of the whole
// design. Bit layout (LSB -> MSB):
//
//   0..43   address                 heap byte offset of the payload
//   43..54  length / split metadata 11-bit embedded length, or split fields
//   54      isLengthFieldEmbedded   1 = embedded, 0 = split
//   55..62  read_lock               0..127 active readers
//   62      write_lock              1 = exclusive writer present
//   63      pinned                  1 = immovable by the defragmenter
//
// All transitions are compare-and-swap on this single word; no field is ever
// observed half-updated.

use std::sync::atomic::{AtomicU64, Ordering};

pub const ADDRESS_BITS: u32 = 43;
pub const ADDRESS_MASK: u64 = (1u64 << ADDRESS_BITS) - 1;

/// All-ones sentinel: "no address" / "not allocated".
pub const INVALID_ADDRESS: u64 = ADDRESS_MASK;

const LEN_FIELD_SHIFT: u32 = ADDRESS_BITS; // 43
const LEN_FIELD_BITS: u32 = 11;
const LEN_FIELD_MASK: u64 = (1u64 << LEN_FIELD_BITS) - 1;

const EMBEDDED_BIT: u32 = 54;
const RLOCK_SHIFT: u32 = 55;
const RLOCK_BITS: u32 = 7;
const RLOCK_MASK: u64 = (1u64 << RLOCK_BITS) - 1;
const WLOCK_BIT: u32 = 62;
const PINNED_BIT: u32 = 63;

/// Maximum inline (embedded) chunk length: fits entirely in the 11-bit field.
pub const MAX_EMBEDDED_LEN: u64 = LEN_FIELD_MASK; // 2047

/// Maximum number of overflow bytes stored in the heap prefix for a split length.
pub const MAX_OVERFLOW_BYTES: usize = 3;

/// Maximum chunk length the split encoding can represent: 8 inline bits plus
/// up to 3 overflow bytes (24 bits) of high-order length.
pub const MAX_SPLIT_LEN: u64 = 0xFF | (0x00FF_FFFFu64 << 8);

/// Maximum concurrent readers before `read_lock` saturates.
pub const MAX_READERS: u32 = (1 << RLOCK_BITS) - 1; // 127

/// Raw value of a `FREE` (never-allocated) slot.
pub const FREE: u64 = 0;

/// Raw value of a `ZOMBIE` slot: a deleted CID's leaf retained to block CID
/// reuse until reclaimed. Chosen disjoint from any valid encoding: all lock
/// and pin bits set, embedded flag set with zero length, and the address
/// field all-ones (`INVALID_ADDRESS`) — see DESIGN.md for the rationale.
pub const ZOMBIE: u64 = ADDRESS_MASK
    | (1 << EMBEDDED_BIT)
    | (RLOCK_MASK << RLOCK_SHIFT)
    | (1 << WLOCK_BIT)
    | (1 << PINNED_BIT);

/// How a chunk's length is physically represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthEncoding {
    /// `total <= MAX_EMBEDDED_LEN`: the full length lives in the 11-bit field.
    Embedded { total: u64 },
    /// `total > MAX_EMBEDDED_LEN`: low 8 bits live in the entry, the
    /// remaining high bits (`overflow_count` bytes, little-endian) are
    /// written into the heap immediately before the payload.
    Split {
        total: u64,
        lsb: u8,
        overflow_count: u8,
        overflow_bytes: [u8; MAX_OVERFLOW_BYTES],
    },
}

impl LengthEncoding {
    /// Total chunk length, regardless of encoding.
    pub fn total(&self) -> u64 {
        match *self {
            LengthEncoding::Embedded { total } => total,
            LengthEncoding::Split { total, .. } => total,
        }
    }

    /// Number of bytes of overflow prefix physically stored in the heap
    /// (0 for embedded chunks).
    pub fn overflow_len(&self) -> usize {
        match self {
            LengthEncoding::Embedded { .. } => 0,
            LengthEncoding::Split { overflow_count, .. } => *overflow_count as usize,
        }
    }

    /// Encode `total` bytes of payload length. Errors if `total` exceeds
    /// what the split encoding can represent (spec's length-field scope,
    /// distinct from heap capacity).
    pub fn encode(total: u64) -> Result<Self, crate::error::DxMemError> {
        if total <= MAX_EMBEDDED_LEN {
            return Ok(LengthEncoding::Embedded { total });
        }
        if total > MAX_SPLIT_LEN {
            return Err(crate::error::DxMemError::SizeTooLarge(total));
        }
        let lsb = (total & 0xFF) as u8;
        let remaining = total >> 8;
        let overflow_count = bytes_needed(remaining).max(1) as u8;
        let mut overflow_bytes = [0u8; MAX_OVERFLOW_BYTES];
        let mut r = remaining;
        for b in overflow_bytes.iter_mut().take(overflow_count as usize) {
            *b = (r & 0xFF) as u8;
            r >>= 8;
        }
        Ok(LengthEncoding::Split {
            total,
            lsb,
            overflow_count,
            overflow_bytes,
        })
    }
}

/// Minimal number of bytes needed to hold `v` (at least 1).
fn bytes_needed(v: u64) -> usize {
    if v == 0 {
        return 1;
    }
    let bits = 64 - v.leading_zeros() as usize;
    (bits + 7) / 8
}

/// A decoded view of an `EntryWord`'s length/embedded-flag fields, before the
/// overflow bytes (if any) have been read from the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LenField {
    pub embedded: bool,
    /// Either the full embedded length, or (lsb, overflow_count-1) packed
    /// into the low 8 and next 2 bits respectively.
    raw11: u16,
}

impl LenField {
    pub fn embedded_total(self) -> Option<u64> {
        self.embedded.then_some(self.raw11 as u64)
    }

    pub fn split_lsb(self) -> u8 {
        (self.raw11 & 0xFF) as u8
    }

    pub fn split_overflow_count(self) -> u8 {
        (((self.raw11 >> 8) & 0b11) as u8) + 1
    }
}

/// A 64-bit chunk entry word. Thin wrapper for bit-level pack/unpack; the
/// mutable working copy used in CAS loops is `WorkingEntry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct EntryWord(pub u64);

impl EntryWord {
    pub const fn from_raw(raw: u64) -> Self {
        EntryWord(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn is_free(self) -> bool {
        self.0 == FREE
    }

    pub fn is_zombie(self) -> bool {
        self.0 == ZOMBIE
    }

    /// A valid entry is neither FREE nor ZOMBIE and has a real address.
    pub fn is_valid(self) -> bool {
        !self.is_free() && !self.is_zombie() && self.address() != INVALID_ADDRESS
    }

    pub fn address(self) -> u64 {
        self.0 & ADDRESS_MASK
    }

    pub fn len_field(self) -> LenField {
        let raw11 = ((self.0 >> LEN_FIELD_SHIFT) & LEN_FIELD_MASK) as u16;
        LenField {
            embedded: (self.0 >> EMBEDDED_BIT) & 1 == 1,
            raw11,
        }
    }

    pub fn read_lock(self) -> u32 {
        ((self.0 >> RLOCK_SHIFT) & RLOCK_MASK) as u32
    }

    pub fn write_lock(self) -> bool {
        (self.0 >> WLOCK_BIT) & 1 == 1
    }

    pub fn pinned(self) -> bool {
        (self.0 >> PINNED_BIT) & 1 == 1
    }

    /// Pack all fields into a new word.
    #[allow(clippy::too_many_arguments)]
    pub fn pack(
        pinned: bool,
        write_lock: bool,
        read_lock: u32,
        length: &LengthEncoding,
        address: u64,
    ) -> Self {
        debug_assert!(address <= ADDRESS_MASK || address == INVALID_ADDRESS);
        debug_assert!(read_lock <= MAX_READERS);
        let (embedded, raw11): (bool, u64) = match *length {
            LengthEncoding::Embedded { total } => {
                debug_assert!(total <= MAX_EMBEDDED_LEN);
                (true, total)
            }
            LengthEncoding::Split {
                lsb,
                overflow_count,
                ..
            } => {
                debug_assert!((1..=MAX_OVERFLOW_BYTES as u8).contains(&overflow_count));
                (
                    false,
                    (lsb as u64) | (((overflow_count - 1) as u64) << 8),
                )
            }
        };
        let mut word = address & ADDRESS_MASK;
        word |= (raw11 & LEN_FIELD_MASK) << LEN_FIELD_SHIFT;
        word |= (embedded as u64) << EMBEDDED_BIT;
        word |= ((read_lock as u64) & RLOCK_MASK) << RLOCK_SHIFT;
        word |= (write_lock as u64) << WLOCK_BIT;
        word |= (pinned as u64) << PINNED_BIT;
        EntryWord(word)
    }
}

/// A stack-allocated, mutable view of an entry: the leaf-slot pointer it was
/// read from, the value seen at that read (`initial`, the CAS comparand),
/// and the current (possibly locally mutated) decoded fields. No reference
/// into the slot is ever kept; `reread` re-synchronizes `initial` and the
/// decoded fields from the slot.
#[derive(Clone, Debug)]
pub struct WorkingEntry {
    slot: *const AtomicU64,
    initial: EntryWord,
    pub address: u64,
    pub length: LengthEncoding,
    pub pinned: bool,
    pub write_lock: bool,
    pub read_lock: u32,
}

// Safety: the pointer only ever targets a CIDTable leaf slot, which is
// itself Sync (AtomicU64). WorkingEntry carries no interior mutability of
// its own beyond the atomic it points at.
unsafe impl Send for WorkingEntry {}

impl WorkingEntry {
    /// Materialize a working entry from a leaf slot and its already-read
    /// word plus any overflow bytes (read by the caller from the heap, since
    /// `WorkingEntry` has no knowledge of the heap).
    pub fn from_word(slot: *const AtomicU64, word: EntryWord, overflow_bytes: &[u8]) -> Self {
        let len_field = word.len_field();
        let length = if let Some(total) = len_field.embedded_total() {
            LengthEncoding::Embedded { total }
        } else {
            let overflow_count = len_field.split_overflow_count();
            let lsb = len_field.split_lsb();
            let mut bytes = [0u8; MAX_OVERFLOW_BYTES];
            let n = (overflow_count as usize).min(overflow_bytes.len());
            bytes[..n].copy_from_slice(&overflow_bytes[..n]);
            let mut hi: u64 = 0;
            for (i, b) in bytes.iter().take(overflow_count as usize).enumerate() {
                hi |= (*b as u64) << (8 * i);
            }
            let total = (lsb as u64) | (hi << 8);
            LengthEncoding::Split {
                total,
                lsb,
                overflow_count,
                overflow_bytes: bytes,
            }
        };
        WorkingEntry {
            slot,
            initial: word,
            address: word.address(),
            length,
            pinned: word.pinned(),
            write_lock: word.write_lock(),
            read_lock: word.read_lock(),
        }
    }

    /// Pointer to the leaf slot this entry was materialized from.
    pub fn slot(&self) -> *const AtomicU64 {
        self.slot
    }

    /// The word last seen from the slot (the CAS comparand).
    pub fn initial_value(&self) -> EntryWord {
        self.initial
    }

    /// Recompose a word from the current (possibly mutated) field set; this
    /// is the write-back value used by `CIDTable::entry_atomic_update`.
    pub fn get_value(&self) -> EntryWord {
        EntryWord::pack(
            self.pinned,
            self.write_lock,
            self.read_lock,
            &self.length,
            self.address,
        )
    }

    /// Refresh `initial` and all decoded fields from a freshly-read word
    /// (used after a failed CAS, or while waiting for a lock to become
    /// available). `overflow_bytes` must be re-read by the caller too, since
    /// a concurrent resize may have rewritten them.
    pub fn reread(&mut self, word: EntryWord, overflow_bytes: &[u8]) {
        *self = Self::from_word(self.slot, word, overflow_bytes);
    }

    /// Advance the CAS comparand to the value just written, after a
    /// successful `compare_exchange` on `slot()`. Lets a caller perform
    /// several CAS steps in sequence (e.g. acquire-lock, then mutate-length)
    /// without re-reading the slot in between.
    pub(crate) fn commit(&mut self) {
        self.initial = self.get_value();
    }
}
