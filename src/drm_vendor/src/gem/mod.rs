// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This module implements the per-vendor GEM requests behind a buffer object.  Allocation and
//! map-offset requests differ per driver; sharing and teardown go through the generic DRM
//! requests.

mod drm;
mod exynos;
mod mediatek;
mod rockchip;
mod system_gem;

use std::fmt;
use std::str::FromStr;

pub use drm::drm_driver_name;
pub use drm::open_device;
pub use drm::GemOpen;
pub use exynos::ExynosGem;
pub use exynos::EXYNOS_BO_CACHABLE;
pub use exynos::EXYNOS_BO_CONTIG;
pub use exynos::EXYNOS_BO_NONCACHABLE;
pub use exynos::EXYNOS_BO_NONCONTIG;
pub use exynos::EXYNOS_BO_WC;
pub use mediatek::MediatekGem;
pub use rockchip::RockchipGem;
pub use system_gem::SystemGem;

use crate::drm_os::AsRawDescriptor;
use crate::drm_utils::DrmBoError;
use crate::drm_utils::DrmBoResult;

/// The kernel requests a buffer object is built from.  `allocate` and `map_offset` are driver
/// specific; the remaining requests default to the generic DRM ioctls on the same descriptor.
///
/// The descriptor returned by `as_raw_descriptor` is the one mappings are made against, at the
/// offset returned by `map_offset`.
pub trait GemBackend: AsRawDescriptor + Send + Sync {
    /// Name of the kernel driver this backend talks to.
    fn driver_name(&self) -> &'static str;

    /// Allocates `size` bytes and returns the new handle.
    fn allocate(&self, size: u64, flags: u32) -> DrmBoResult<u32>;

    /// Returns the fake offset at which `handle` can be mapped through the device descriptor.
    fn map_offset(&self, handle: u32) -> DrmBoResult<u64>;

    /// Opens the object exported under the global `name`.
    fn open_by_name(&self, name: u32) -> DrmBoResult<GemOpen> {
        drm::gem_open(self.as_raw_descriptor(), name)
    }

    /// Exports `handle` under a global name.
    fn flink(&self, handle: u32) -> DrmBoResult<u32> {
        drm::gem_flink(self.as_raw_descriptor(), handle)
    }

    /// Drops this process' reference to `handle`.
    fn close_handle(&self, handle: u32) -> DrmBoResult<()> {
        drm::gem_close(self.as_raw_descriptor(), handle)
    }
}

/// The DRM drivers with a dedicated backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Vendor {
    Mediatek,
    Exynos,
    Rockchip,
}

impl Vendor {
    /// The name the kernel driver reports through `DRM_IOCTL_VERSION`.
    pub fn driver_name(self) -> &'static str {
        match self {
            Vendor::Mediatek => "mediatek",
            Vendor::Exynos => "exynos",
            Vendor::Rockchip => "rockchip",
        }
    }

    /// Returns the backend for this vendor, issuing its requests on `descriptor`.  The backend
    /// borrows the descriptor for as long as it lives.
    pub fn backend<'fd>(self, descriptor: &'fd dyn AsRawDescriptor) -> Box<dyn GemBackend + 'fd> {
        match self {
            Vendor::Mediatek => Box::new(MediatekGem::new(descriptor)),
            Vendor::Exynos => Box::new(ExynosGem::new(descriptor)),
            Vendor::Rockchip => Box::new(RockchipGem::new(descriptor)),
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.driver_name())
    }
}

impl FromStr for Vendor {
    type Err = DrmBoError;

    fn from_str(s: &str) -> DrmBoResult<Vendor> {
        match s {
            "mediatek" | "mtk" => Ok(Vendor::Mediatek),
            "exynos" => Ok(Vendor::Exynos),
            "rockchip" | "rk" => Ok(Vendor::Rockchip),
            _ => Err(DrmBoError::InvalidArgument("unknown vendor")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;

    #[test]
    fn vendor_names_round_trip() {
        for vendor in [Vendor::Mediatek, Vendor::Exynos, Vendor::Rockchip] {
            assert_eq!(vendor.driver_name().parse::<Vendor>().unwrap(), vendor);
            assert_eq!(vendor.to_string(), vendor.driver_name());
        }

        assert_eq!("mtk".parse::<Vendor>().unwrap(), Vendor::Mediatek);
        assert!(matches!(
            "tegra".parse::<Vendor>(),
            Err(DrmBoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn vendor_backend_uses_given_descriptor() {
        let file = File::open("/proc/self/status").unwrap();

        for vendor in [Vendor::Mediatek, Vendor::Exynos, Vendor::Rockchip] {
            let backend = vendor.backend(&file);
            assert_eq!(backend.driver_name(), vendor.driver_name());
            assert_eq!(backend.as_raw_descriptor(), file.as_raw_descriptor());

            // Not a DRM node, so every request is rejected by the kernel.
            assert!(matches!(
                backend.allocate(4096, 0),
                Err(DrmBoError::DeviceError { .. })
            ));
            assert!(matches!(
                backend.map_offset(1),
                Err(DrmBoError::DeviceError { .. })
            ));
        }
    }
}
