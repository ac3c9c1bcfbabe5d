// Copyright 2017 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::convert::TryInto;
use std::ffi::CStr;
use std::os::unix::io::OwnedFd;

use libc::off_t;
use nix::fcntl::fallocate;
use nix::fcntl::FallocateFlags;
use nix::sys::memfd::memfd_create;
use nix::sys::memfd::MFdFlags;
use nix::unistd::ftruncate;
use nix::unistd::sysconf;
use nix::unistd::SysconfVar;
use vmm_sys_util::align_upwards;

use crate::drm_os::descriptor::AsRawDescriptor;
use crate::drm_os::RawDescriptor;
use crate::drm_utils::DrmBoError;
use crate::drm_utils::DrmBoResult;

pub struct SharedMemory {
    fd: OwnedFd,
    size: u64,
}

impl SharedMemory {
    /// Creates a new shared memory file descriptor of `size` bytes.
    ///
    /// If a name is given, it will appear in `/proc/self/fd/<shm fd>` for the purposes of
    /// debugging. The name does not need to be unique.
    ///
    /// The file descriptor is opened with the close on exec flag and allows memfd sealing.
    pub fn new(debug_name: &CStr, size: u64) -> DrmBoResult<SharedMemory> {
        let fd = memfd_create(
            debug_name,
            MFdFlags::MFD_CLOEXEC | MFdFlags::MFD_ALLOW_SEALING,
        )?;

        let size_off_t: off_t = size.try_into()?;
        ftruncate(&fd, size_off_t)?;

        Ok(SharedMemory { fd, size })
    }

    /// Resizes the shared memory.  Existing mappings of the retained range stay valid.
    pub fn set_size(&mut self, size: u64) -> DrmBoResult<()> {
        let size_off_t: off_t = size.try_into()?;
        ftruncate(&self.fd, size_off_t)?;
        self.size = size;
        Ok(())
    }

    /// Releases the pages backing `len` bytes at `offset` without changing the size.  Reads of
    /// the range return zeroes afterwards.
    pub fn punch_hole(&self, offset: u64, len: u64) -> DrmBoResult<()> {
        let offset: off_t = offset.try_into()?;
        let len: off_t = len.try_into()?;
        fallocate(
            &self.fd,
            FallocateFlags::FALLOC_FL_PUNCH_HOLE | FallocateFlags::FALLOC_FL_KEEP_SIZE,
            offset,
            len,
        )?;
        Ok(())
    }

    /// Gets the size in bytes of the shared memory.
    ///
    /// The size returned here does not reflect changes by other interfaces or users of the shared
    /// memory file descriptor..
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl AsRawDescriptor for SharedMemory {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.fd.as_raw_descriptor()
    }
}

/// Uses the system's page size in bytes to round the given value up to the nearest page boundary.
pub fn round_up_to_page_size(v: u64) -> DrmBoResult<u64> {
    let page_size_opt = sysconf(SysconfVar::PAGE_SIZE)?;
    if let Some(page_size) = page_size_opt {
        let aligned_size = align_upwards!(v, page_size as u64);
        Ok(aligned_size)
    } else {
        Err(DrmBoError::Unsupported)
    }
}
