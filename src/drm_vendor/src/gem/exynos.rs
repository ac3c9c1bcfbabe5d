// Copyright 2018 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

#![allow(non_camel_case_types)]

use std::marker::PhantomData;

use nix::ioctl_readwrite;
use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::drm_os::AsRawDescriptor;
use crate::drm_os::Descriptor;
use crate::drm_os::RawDescriptor;
use crate::drm_utils::DrmBoResult;
use crate::drm_utils::GemRequest;
use crate::gem::drm::gem_ioctl;
use crate::gem::drm::DRM_COMMAND_BASE;
use crate::gem::drm::DRM_IOCTL_BASE;
use crate::gem::GemBackend;

/*
 * Memory type and cache attribute of an Exynos buffer.  Bit 0 picks the memory type and bit 1
 * the cache attribute, so CONTIG and NONCACHABLE are the zero values of their bit.
 */
/// Physically contiguous memory.
pub const EXYNOS_BO_CONTIG: u32 = 0;
/// Memory that may be scattered, mapped through the IOMMU.
pub const EXYNOS_BO_NONCONTIG: u32 = 1 << 0;
pub const EXYNOS_BO_NONCACHABLE: u32 = 0;
pub const EXYNOS_BO_CACHABLE: u32 = 1 << 1;
/// Write-combined mapping.
pub const EXYNOS_BO_WC: u32 = 1 << 2;

const DRM_EXYNOS_GEM_CREATE: u32 = 0x00;
const DRM_EXYNOS_GEM_MAP: u32 = 0x01;

#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub struct drm_exynos_gem_create {
    size: u64,
    flags: u32,
    handle: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub struct drm_exynos_gem_map {
    handle: u32,
    reserved: u32,
    offset: u64,
}

ioctl_readwrite!(
    drm_ioctl_exynos_gem_create,
    DRM_IOCTL_BASE,
    DRM_COMMAND_BASE + DRM_EXYNOS_GEM_CREATE,
    drm_exynos_gem_create
);
ioctl_readwrite!(
    drm_ioctl_exynos_gem_map,
    DRM_IOCTL_BASE,
    DRM_COMMAND_BASE + DRM_EXYNOS_GEM_MAP,
    drm_exynos_gem_map
);

/// GEM requests of the Exynos DRM driver.  `allocate` takes a combination of the `EXYNOS_BO_*`
/// flags.
pub struct ExynosGem<'fd> {
    descriptor: Descriptor,
    _device: PhantomData<&'fd ()>,
}

impl<'fd> ExynosGem<'fd> {
    /// The backend borrows `descriptor`, which therefore stays open while the backend lives.
    pub fn new(descriptor: &'fd dyn AsRawDescriptor) -> ExynosGem<'fd> {
        ExynosGem {
            descriptor: Descriptor(descriptor.as_raw_descriptor()),
            _device: PhantomData,
        }
    }
}

impl AsRawDescriptor for ExynosGem<'_> {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.descriptor.as_raw_descriptor()
    }
}

impl GemBackend for ExynosGem<'_> {
    fn driver_name(&self) -> &'static str {
        "exynos"
    }

    fn allocate(&self, size: u64, flags: u32) -> DrmBoResult<u32> {
        let fd = self.as_raw_descriptor();
        let mut req = drm_exynos_gem_create {
            size,
            flags,
            ..Default::default()
        };

        // Safe because the kernel writes no more than size_of::<drm_exynos_gem_create>() bytes.
        gem_ioctl(GemRequest::Allocate, || unsafe {
            drm_ioctl_exynos_gem_create(fd, &mut req)
        })?;

        Ok(req.handle)
    }

    fn map_offset(&self, handle: u32) -> DrmBoResult<u64> {
        let fd = self.as_raw_descriptor();
        let mut req = drm_exynos_gem_map {
            handle,
            ..Default::default()
        };

        // Safe because the kernel writes no more than size_of::<drm_exynos_gem_map>() bytes.
        gem_ioctl(GemRequest::MapOffset, || unsafe {
            drm_ioctl_exynos_gem_map(fd, &mut req)
        })?;

        Ok(req.offset)
    }
}
