// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::drm_os::sys::platform::MemoryMapping as PlatformMapping;
use crate::drm_os::AsRawDescriptor;
use crate::drm_os::MappedRegion;
use crate::drm_utils::DrmBoResult;

/// A shared, read-write view of a buffer object in the current process.  Unmapped on drop.
#[derive(Debug)]
pub struct MemoryMapping {
    mapping: PlatformMapping,
}

impl MemoryMapping {
    /// Maps `size` bytes of `descriptor` starting at `offset`.
    pub fn from_descriptor(
        descriptor: &dyn AsRawDescriptor,
        offset: u64,
        size: usize,
    ) -> DrmBoResult<MemoryMapping> {
        let mapping = PlatformMapping::from_descriptor(descriptor, offset, size)?;
        Ok(MemoryMapping { mapping })
    }
}

// Safe because the mapping stays valid until `self` is dropped, and exclusive access to its
// contents is up to the owner of the mapping.
unsafe impl MappedRegion for MemoryMapping {
    fn as_ptr(&self) -> *mut u8 {
        self.mapping.addr.as_ptr() as *mut u8
    }

    fn size(&self) -> usize {
        self.mapping.size
    }
}
