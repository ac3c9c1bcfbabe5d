// Copyright 2018 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A crate for allocating, mapping and sharing GEM buffer objects through the MediaTek, Exynos
//! and Rockchip DRM drivers.

#[macro_use]
mod macros;
mod buffer_object;
mod device;
mod drm_os;
mod drm_utils;
mod gem;

pub use crate::buffer_object::BufferObject;
pub use crate::device::Device;
pub use crate::device::DeviceBuilder;
pub use crate::drm_os::AsRawDescriptor;
pub use crate::drm_os::Descriptor;
pub use crate::drm_os::MappedRegion as DrmMappedRegion;
pub use crate::drm_os::MemoryMapping;
pub use crate::drm_os::RawDescriptor;
pub use crate::drm_utils::*;
pub use crate::gem::*;
