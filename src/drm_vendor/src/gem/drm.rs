// Copyright 2018 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Driver-independent DRM requests: GEM handle sharing and teardown, plus device discovery.

#![allow(non_camel_case_types)]

use std::ffi::CString;
use std::fs::File;
use std::fs::OpenOptions;
use std::os::raw::c_char;
use std::os::raw::c_int;
use std::os::raw::c_uint;
#[cfg(target_pointer_width = "64")]
use std::os::raw::c_ulong;
use std::path::Path;
use std::ptr::null_mut;

use log::debug;
use nix::errno::Errno;
use nix::ioctl_readwrite;
use nix::ioctl_write_ptr;
use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::drm_os::AsRawDescriptor;
use crate::drm_os::RawDescriptor;
use crate::drm_utils::DrmBoError;
use crate::drm_utils::DrmBoResult;
use crate::drm_utils::GemRequest;

// Consistent with __kernel_size_t in include/uapi/asm-generic/posix_types.h.
#[cfg(not(target_pointer_width = "64"))]
type __kernel_size_t = c_uint;
#[cfg(target_pointer_width = "64")]
type __kernel_size_t = c_ulong;

pub(crate) const DRM_IOCTL_BASE: c_uint = 0x64;
/// Driver specific ioctls start here.
pub(crate) const DRM_COMMAND_BASE: c_uint = 0x40;

const DRM_IOCTL_VERSION: c_uint = 0x00;
const DRM_IOCTL_GEM_CLOSE: c_uint = 0x09;
const DRM_IOCTL_GEM_FLINK: c_uint = 0x0a;
const DRM_IOCTL_GEM_OPEN: c_uint = 0x0b;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct drm_version {
    version_major: c_int,
    version_minor: c_int,
    version_patchlevel: c_int,
    name_len: __kernel_size_t,
    name: *mut c_char,
    date_len: __kernel_size_t,
    date: *mut c_char,
    desc_len: __kernel_size_t,
    desc: *mut c_char,
}

#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub struct drm_gem_close {
    handle: u32,
    pad: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub struct drm_gem_flink {
    handle: u32,
    name: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub struct drm_gem_open {
    name: u32,
    handle: u32,
    size: u64,
}

ioctl_readwrite!(
    drm_get_version,
    DRM_IOCTL_BASE,
    DRM_IOCTL_VERSION,
    drm_version
);
ioctl_write_ptr!(
    drm_ioctl_gem_close,
    DRM_IOCTL_BASE,
    DRM_IOCTL_GEM_CLOSE,
    drm_gem_close
);
ioctl_readwrite!(
    drm_ioctl_gem_flink,
    DRM_IOCTL_BASE,
    DRM_IOCTL_GEM_FLINK,
    drm_gem_flink
);
ioctl_readwrite!(
    drm_ioctl_gem_open,
    DRM_IOCTL_BASE,
    DRM_IOCTL_GEM_OPEN,
    drm_gem_open
);

/// Restarts `ioctl` while the kernel reports it was interrupted, like libdrm's `drmIoctl`.
pub(crate) fn retry_ioctl<F>(mut ioctl: F) -> nix::Result<c_int>
where
    F: FnMut() -> nix::Result<c_int>,
{
    loop {
        match ioctl() {
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
            result => return result,
        }
    }
}

/// Runs `ioctl` through `retry_ioctl`, tagging a failure with the request it belongs to.
pub(crate) fn gem_ioctl<F>(request: GemRequest, ioctl: F) -> DrmBoResult<()>
where
    F: FnMut() -> nix::Result<c_int>,
{
    retry_ioctl(ioctl)
        .map(|_| ())
        .map_err(|errno| DrmBoError::DeviceError { request, errno })
}

/// A GEM object opened from its global name.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GemOpen {
    pub handle: u32,
    /// Size of the object as reported by the driver, zero when unknown.
    pub size: u64,
}

pub(crate) fn gem_open(fd: RawDescriptor, name: u32) -> DrmBoResult<GemOpen> {
    let mut req = drm_gem_open {
        name,
        ..Default::default()
    };

    // Safe because the kernel writes no more than size_of::<drm_gem_open>() bytes to req.
    gem_ioctl(GemRequest::OpenByName, || unsafe {
        drm_ioctl_gem_open(fd, &mut req)
    })?;

    Ok(GemOpen {
        handle: req.handle,
        size: req.size,
    })
}

pub(crate) fn gem_flink(fd: RawDescriptor, handle: u32) -> DrmBoResult<u32> {
    let mut req = drm_gem_flink {
        handle,
        ..Default::default()
    };

    // Safe because the kernel writes no more than size_of::<drm_gem_flink>() bytes to req.
    gem_ioctl(GemRequest::Flink, || unsafe {
        drm_ioctl_gem_flink(fd, &mut req)
    })?;

    Ok(req.name)
}

pub(crate) fn gem_close(fd: RawDescriptor, handle: u32) -> DrmBoResult<()> {
    let req = drm_gem_close {
        handle,
        ..Default::default()
    };

    // Safe because the kernel only reads req.
    gem_ioctl(GemRequest::CloseHandle, || unsafe {
        drm_ioctl_gem_close(fd, &req)
    })
}

/// Returns the name of the kernel driver behind `fd`, e.g. "rockchip".
pub fn drm_driver_name(fd: &dyn AsRawDescriptor) -> DrmBoResult<String> {
    let fd = fd.as_raw_descriptor();
    let mut version = drm_version {
        version_major: 0,
        version_minor: 0,
        version_patchlevel: 0,
        name_len: 0,
        name: null_mut(),
        date_len: 0,
        date: null_mut(),
        desc_len: 0,
        desc: null_mut(),
    };

    // Get the length of the device name.
    gem_ioctl(GemRequest::Version, || unsafe {
        drm_get_version(fd, &mut version)
    })?;

    // Enough bytes to hold the device name and terminating null character.
    let mut name_bytes: Vec<u8> = vec![0; (version.name_len + 1) as usize];
    let mut version = drm_version {
        version_major: 0,
        version_minor: 0,
        version_patchlevel: 0,
        name_len: name_bytes.len() as __kernel_size_t,
        name: name_bytes.as_mut_ptr() as *mut c_char,
        date_len: 0,
        date: null_mut(),
        desc_len: 0,
        desc: null_mut(),
    };

    // Safe as no more than name_len + 1 bytes will be written to name.
    gem_ioctl(GemRequest::Version, || unsafe {
        drm_get_version(fd, &mut version)
    })?;

    CString::new(&name_bytes[..(version.name_len as usize)])
        .map_err(|_| DrmBoError::InvalidArgument("driver name contains NUL"))?
        .into_string()
        .map_err(|_| DrmBoError::InvalidArgument("driver name is not UTF-8"))
}

/// Returns a `File` for the first DRM node driven by `driver`.  Primary nodes are tried before
/// render nodes, since GEM global names can only be used on primary nodes.
pub fn open_device(driver: &str) -> DrmBoResult<File> {
    const DRM_DIR_NAME: &str = "/dev/dri";
    const DRM_MAX_MINOR: u32 = 15;
    const RENDER_NODE_START: u32 = 128;

    let primary = (0..=DRM_MAX_MINOR).map(|n| format!("card{}", n));
    let render =
        (RENDER_NODE_START..=RENDER_NODE_START + DRM_MAX_MINOR).map(|n| format!("renderD{}", n));

    for node in primary.chain(render) {
        let path = Path::new(DRM_DIR_NAME).join(node);

        if let Ok(fd) = OpenOptions::new().read(true).write(true).open(&path) {
            match drm_driver_name(&fd) {
                Ok(name) if name == driver => {
                    debug!("using {} for driver {}", path.display(), driver);
                    return Ok(fd);
                }
                Ok(name) => debug!("skipping {}: driven by {}", path.display(), name),
                Err(e) => debug!("skipping {}: {}", path.display(), e),
            }
        }
    }

    Err(DrmBoError::NoDevice(driver.to_string()))
}
