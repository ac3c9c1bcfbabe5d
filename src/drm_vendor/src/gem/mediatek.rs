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

const DRM_MTK_GEM_CREATE: u32 = 0x00;
const DRM_MTK_GEM_MAP_OFFSET: u32 = 0x01;

#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub struct drm_mtk_gem_create {
    size: u64,
    flags: u32,
    handle: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub struct drm_mtk_gem_map_off {
    handle: u32,
    pad: u32,
    offset: u64,
}

ioctl_readwrite!(
    drm_ioctl_mtk_gem_create,
    DRM_IOCTL_BASE,
    DRM_COMMAND_BASE + DRM_MTK_GEM_CREATE,
    drm_mtk_gem_create
);
ioctl_readwrite!(
    drm_ioctl_mtk_gem_map_offset,
    DRM_IOCTL_BASE,
    DRM_COMMAND_BASE + DRM_MTK_GEM_MAP_OFFSET,
    drm_mtk_gem_map_off
);

/// GEM requests of the MediaTek DRM driver.
pub struct MediatekGem<'fd> {
    descriptor: Descriptor,
    _device: PhantomData<&'fd ()>,
}

impl<'fd> MediatekGem<'fd> {
    /// The backend borrows `descriptor`, which therefore stays open while the backend lives.
    pub fn new(descriptor: &'fd dyn AsRawDescriptor) -> MediatekGem<'fd> {
        MediatekGem {
            descriptor: Descriptor(descriptor.as_raw_descriptor()),
            _device: PhantomData,
        }
    }
}

impl AsRawDescriptor for MediatekGem<'_> {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.descriptor.as_raw_descriptor()
    }
}

impl GemBackend for MediatekGem<'_> {
    fn driver_name(&self) -> &'static str {
        "mediatek"
    }

    fn allocate(&self, size: u64, flags: u32) -> DrmBoResult<u32> {
        let fd = self.as_raw_descriptor();
        let mut req = drm_mtk_gem_create {
            size,
            flags,
            ..Default::default()
        };

        // Safe because the kernel writes no more than size_of::<drm_mtk_gem_create>() bytes.
        gem_ioctl(GemRequest::Allocate, || unsafe {
            drm_ioctl_mtk_gem_create(fd, &mut req)
        })?;

        Ok(req.handle)
    }

    fn map_offset(&self, handle: u32) -> DrmBoResult<u64> {
        let fd = self.as_raw_descriptor();
        let mut req = drm_mtk_gem_map_off {
            handle,
            ..Default::default()
        };

        // Safe because the kernel writes no more than size_of::<drm_mtk_gem_map_off>() bytes.
        gem_ioctl(GemRequest::MapOffset, || unsafe {
            drm_ioctl_mtk_gem_map_offset(fd, &mut req)
        })?;

        Ok(req.offset)
    }
}
