// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Reservation of the large contiguous address-space region backing `Heap`.
// Unlike the IPC primitives this crate's ancestor provided (named shared
// memory mapped by multiple processes), DXMem's heap is private to a single
// process: one big anonymous reservation, never named, never shared.

#[cfg(unix)]
pub mod posix;

#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use posix::{release_region, reserve_region};

#[cfg(windows)]
pub use windows::{release_region, reserve_region};
