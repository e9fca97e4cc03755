// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Status codes returned by the operation layer (`ops`/`DxMem`).
//
// These are expected, frequently-checked outcomes — not `std::error::Error`.
// Construction-time and platform failures use `DxMemError` (`error.rs`) instead.

/// Outcome of a DXMem operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation completed normally.
    Ok,
    /// The CID does not resolve to a live chunk (never inserted, or removed).
    DoesNotExist,
    /// The CID's node id does not belong to this table, or the CID is the
    /// reserved-invalid value (local id 0).
    InvalidId,
    /// A lock could not be acquired within the caller-specified timeout.
    LockTimeout,
    /// The heap allocator could not satisfy the request.
    OutOfMemory,
}

impl Status {
    /// Whether this status represents success.
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}
