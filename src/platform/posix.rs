// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX heap-region reservation via a private anonymous mmap.
//
// `MAP_NORESERVE` asks the kernel not to commit swap/physical backing up
// front, which is what makes reserving "hundreds of GiB" of address space
// for a heap that is mostly empty at any given moment practical — pages are
// faulted in (and count against RSS) only as the allocator actually touches
// them.

use std::io;
use std::ptr;

/// Reserve `size` bytes of private, zero-initialised address space.
pub fn reserve_region(size: usize) -> io::Result<*mut u8> {
    if size == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
    }

    let mut flags = libc::MAP_PRIVATE | libc::MAP_ANON;
    #[cfg(not(target_os = "macos"))]
    {
        flags |= libc::MAP_NORESERVE;
    }

    let mem = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            -1,
            0,
        )
    };

    if mem == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    Ok(mem as *mut u8)
}

/// Release a region previously returned by `reserve_region`.
pub fn release_region(ptr: *mut u8, size: usize) {
    if ptr.is_null() || size == 0 {
        return;
    }
    unsafe {
        libc::munmap(ptr as *mut libc::c_void, size);
    }
}
