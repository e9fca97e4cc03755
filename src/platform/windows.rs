// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Windows heap-region reservation via VirtualAlloc.
//
// `MEM_RESERVE` claims the address range without committing physical/page
// file backing; `MEM_COMMIT` on the same call still only backs pages lazily
// on first touch under the hood, so this mirrors the POSIX
// `MAP_NORESERVE` behaviour closely enough for a "hundreds of GiB,
// sparsely touched" heap.

use std::io;

use windows_sys::Win32::System::Memory::{VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE};

/// Reserve and commit `size` bytes of private, zero-initialised address space.
pub fn reserve_region(size: usize) -> io::Result<*mut u8> {
    if size == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
    }

    let mem = unsafe {
        VirtualAlloc(
            std::ptr::null(),
            size,
            MEM_RESERVE | MEM_COMMIT,
            PAGE_READWRITE,
        )
    };

    if mem.is_null() {
        return Err(io::Error::last_os_error());
    }

    Ok(mem as *mut u8)
}

/// Release a region previously returned by `reserve_region`.
pub fn release_region(ptr: *mut u8, _size: usize) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        VirtualFree(ptr as *mut _, 0, MEM_RELEASE);
    }
}
