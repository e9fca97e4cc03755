// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Construction-time and platform-level error type.
//
// Distinct from `Status`: these are failures that prevent a `DxMem` from
// existing at all, or that indicate a programmer error so severe it cannot
// be reported as a routine status code.

use thiserror::Error;

/// Errors that can occur while constructing or administering a `DxMem`.
#[derive(Debug, Error)]
pub enum DxMemError {
    /// The requested heap size exceeds the 43-bit addressable range (8 TiB).
    #[error("heap size {requested} exceeds the maximum addressable size {max}")]
    HeapTooLarge { requested: u64, max: u64 },

    /// The OS refused to reserve the address-space region for the heap.
    #[error("failed to reserve {size} bytes of address space: {source}")]
    ReservationFailed {
        size: usize,
        #[source]
        source: std::io::Error,
    },

    /// A configuration value is out of its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A chunk payload exceeds the encodable length (2^32 - 1 bytes), which
    /// is the limit imposed by the entry word's split length-field layout
    /// (8 inline bits + up to 3 overflow bytes), independent of remaining
    /// heap capacity.
    #[error("chunk size {0} exceeds the maximum encodable length")]
    SizeTooLarge(u64),
}
