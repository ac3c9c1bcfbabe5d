// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::num::NonZeroUsize;
use std::os::unix::io::BorrowedFd;
use std::ptr::NonNull;

use libc::c_void;
use libc::off_t;
use log::error;
use nix::sys::mman::mmap;
use nix::sys::mman::munmap;
use nix::sys::mman::MapFlags;
use nix::sys::mman::ProtFlags;

use crate::drm_os::descriptor::AsRawDescriptor;
use crate::drm_utils::DrmBoError;
use crate::drm_utils::DrmBoResult;

/// Wraps a shared mapping of a device-backed region in the current process. Provides
/// RAII semantics including munmap when no longer needed.
#[derive(Debug)]
pub struct MemoryMapping {
    pub addr: NonNull<c_void>,
    pub size: usize,
}

// Safe because the mapping is owned by this struct and is only unmapped on drop.
unsafe impl Send for MemoryMapping {}
unsafe impl Sync for MemoryMapping {}

impl Drop for MemoryMapping {
    fn drop(&mut self) {
        // This is safe because we mmap the area at addr ourselves, and nobody
        // else is holding a reference to it.
        if let Err(e) = unsafe { munmap(self.addr, self.size) } {
            error!("failed to munmap {:p} ({} bytes): {}", self.addr, self.size, e);
        }
    }
}

impl MemoryMapping {
    pub fn from_descriptor(
        descriptor: &dyn AsRawDescriptor,
        offset: u64,
        size: usize,
    ) -> DrmBoResult<MemoryMapping> {
        let non_zero_size =
            NonZeroUsize::new(size).ok_or(DrmBoError::InvalidArgument("zero size mapping"))?;
        let offset: off_t = offset.try_into()?;

        // Safe because the descriptor is kept open by the caller for the duration of this call,
        // and the kernel picks the address so no existing mapping is clobbered.
        let addr = unsafe {
            let fd = BorrowedFd::borrow_raw(descriptor.as_raw_descriptor());
            mmap(
                None,
                non_zero_size,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                offset,
            )
        }
        .map_err(DrmBoError::MappingError)?;

        Ok(MemoryMapping { addr, size })
    }
}
