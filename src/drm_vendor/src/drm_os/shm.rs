// Copyright 2020 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::ffi::CString;

use crate::drm_os::sys::platform::SharedMemory as SysUtilSharedMemory;
use crate::drm_os::AsRawDescriptor;
use crate::drm_os::RawDescriptor;
use crate::drm_utils::DrmBoError;
use crate::drm_utils::DrmBoResult;

pub struct SharedMemory(pub(crate) SysUtilSharedMemory);
impl SharedMemory {
    /// Creates a new shared memory object of the given size.
    ///
    /// |name| is purely for debugging purposes. It does not need to be unique, and it does
    /// not affect any non-debugging related properties of the constructed shared memory.
    pub fn new<T: Into<Vec<u8>>>(debug_name: T, size: u64) -> DrmBoResult<SharedMemory> {
        let debug_name = CString::new(debug_name)
            .map_err(|_| DrmBoError::InvalidArgument("shared memory name contains NUL"))?;
        SysUtilSharedMemory::new(&debug_name, size).map(SharedMemory)
    }

    /// Grows or shrinks the shared memory object to `size` bytes.
    pub fn set_size(&mut self, size: u64) -> DrmBoResult<()> {
        self.0.set_size(size)
    }

    /// Gives the pages of the given range back to the system.
    pub fn punch_hole(&self, offset: u64, len: u64) -> DrmBoResult<()> {
        self.0.punch_hole(offset, len)
    }

    pub fn size(&self) -> u64 {
        self.0.size()
    }
}

impl AsRawDescriptor for SharedMemory {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.0.as_raw_descriptor()
    }
}
