// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Import/export wire format: a flat, length-prefixed encoding for moving a
// `DxMem` instance's live contents across process boundaries, independent
// of in-memory layout. A writer that accumulates bytes and a reader that
// walks them back out, built around a compact (LEB128-style) varint rather
// than a schema-carrying table format, since the payloads here are plain
// CID/byte-blob pairs with no schema evolution story to justify one.

use crate::cid::Cid;
use crate::ops::DxMem;

/// Errors produced while decoding a previously exported byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ended before a value could be fully decoded.
    UnexpectedEof,
}

/// Accumulates an encoded byte stream.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    /// Encode `v` as a little-endian base-128 varint: 7 value bits per byte,
    /// continuation signalled by the high bit.
    pub fn write_compact(&mut self, mut v: u64) {
        loop {
            let mut byte = (v & 0x7F) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            self.buf.push(byte);
            if v == 0 {
                break;
            }
        }
    }

    /// Write a length-prefixed byte string.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.write_compact(data.len() as u64);
        self.buf.extend_from_slice(data);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Walks a previously encoded byte stream.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn read_compact(&mut self) -> Result<u64, CodecError> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = *self.buf.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
            self.pos += 1;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_compact()? as usize;
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
        let slice = self.buf.get(self.pos..end).ok_or(CodecError::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Serialize every currently-live chunk in `mem` as a sequence of
/// `(cid, payload)` pairs. Zombie and free slots are omitted —
/// re-importing never recreates a tombstone.
pub fn export_all(mem: &DxMem) -> Vec<u8> {
    let mut cids = Vec::new();
    mem.cidtable().for_each_valid(|cid, _word| cids.push(cid));

    let mut w = Writer::new();
    w.write_compact(cids.len() as u64);
    for cid in cids {
        if let Ok(data) = mem.get(cid, -1) {
            w.write_compact(cid.raw());
            w.write_bytes(&data);
        }
    }
    w.into_bytes()
}

/// Recreate every `(cid, payload)` pair encoded by `export_all` into `mem`.
/// Returns the number of chunks imported; a pair whose CID collides with an
/// already-live chunk in `mem` is skipped rather than overwriting it.
pub fn import_all(mem: &DxMem, data: &[u8]) -> Result<usize, CodecError> {
    let mut r = Reader::new(data);
    let count = r.read_compact()?;
    let mut imported = 0usize;
    for _ in 0..count {
        let raw_cid = r.read_compact()?;
        let payload = r.read_bytes()?;
        let cid = Cid::from_raw(raw_cid);
        if mem.create_reserved(cid, payload).is_ok() {
            imported += 1;
        }
    }
    Ok(imported)
}
