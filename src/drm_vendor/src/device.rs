// Copyright 2018 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! device: A DRM device node wrapped together with the GEM backend of its driver.

use std::fmt;

use log::error;

use crate::buffer_object::BufferObject;
use crate::drm_os::AsRawDescriptor;
use crate::drm_os::RawDescriptor;
use crate::drm_utils::*;
use crate::gem::GemBackend;
use crate::gem::Vendor;

/// An open DRM device.  The descriptor it was built from is borrowed for `'fd`: dropping the
/// `Device` does not close it, and the descriptor cannot be closed while the `Device` or any of
/// its buffer objects are alive.
///
/// ```compile_fail
/// use std::fs::File;
/// use drm_vendor::Device;
/// use drm_vendor::Vendor;
///
/// let file = File::open("/dev/null").unwrap();
/// let device = Device::new(&file, Vendor::Rockchip).unwrap();
/// drop(file);
/// let _bo = device.create_bo(4096, 0);
/// ```
pub struct Device<'fd> {
    backend: Box<dyn GemBackend + 'fd>,
    vendor: Option<Vendor>,
    debug_handler: Option<DrmBoDebugHandler>,
}

impl<'fd> Device<'fd> {
    /// Wraps an already open device node driven by `vendor`'s driver.
    pub fn new(
        descriptor: &'fd dyn AsRawDescriptor,
        vendor: Vendor,
    ) -> DrmBoResult<Device<'fd>> {
        DeviceBuilder::new().build(descriptor, vendor)
    }

    /// Wraps an arbitrary GEM backend, e.g. `SystemGem`.
    pub fn from_backend(backend: Box<dyn GemBackend + 'fd>) -> Device<'fd> {
        DeviceBuilder::new().build_with_backend(backend)
    }

    /// The vendor this device was opened for, `None` for a custom backend.
    pub fn vendor(&self) -> Option<Vendor> {
        self.vendor
    }

    pub fn driver_name(&self) -> &'static str {
        self.backend.driver_name()
    }

    pub fn backend(&self) -> &(dyn GemBackend + 'fd) {
        self.backend.as_ref()
    }

    /// Shorthand for `BufferObject::create(self, size, flags)`.
    pub fn create_bo(&self, size: u64, flags: u32) -> DrmBoResult<BufferObject<'_>> {
        BufferObject::create(self, size, flags)
    }

    /// Shorthand for `BufferObject::from_name(self, name)`.
    pub fn bo_from_name(&self, name: u32) -> DrmBoResult<BufferObject<'_>> {
        BufferObject::from_name(self, name)
    }

    /// Records a failure that cannot be returned to the caller.
    pub(crate) fn report(&self, debug: DrmBoDebug) {
        error!(
            "{}: {} request for handle {} failed: {}",
            self.driver_name(),
            debug.request,
            debug.handle,
            debug.message
        );

        if let Some(handler) = &self.debug_handler {
            handler.call(debug);
        }
    }
}

impl AsRawDescriptor for Device<'_> {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.backend.as_raw_descriptor()
    }
}

impl fmt::Debug for Device<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("driver", &self.driver_name())
            .field("descriptor", &self.as_raw_descriptor())
            .finish()
    }
}

/// Builder for a `Device`.
#[derive(Default)]
pub struct DeviceBuilder {
    debug_handler: Option<DrmBoDebugHandler>,
}

impl DeviceBuilder {
    /// Create new a DeviceBuilder.
    pub fn new() -> DeviceBuilder {
        DeviceBuilder {
            debug_handler: None,
        }
    }

    /// Set the handler receiving failures that happen while buffer objects are torn down.
    pub fn set_debug_handler(mut self, debug_handler: Option<DrmBoDebugHandler>) -> DeviceBuilder {
        self.debug_handler = debug_handler;
        self
    }

    /// Builds a `Device` issuing `vendor`'s requests on `descriptor`.
    pub fn build<'fd>(
        self,
        descriptor: &'fd dyn AsRawDescriptor,
        vendor: Vendor,
    ) -> DrmBoResult<Device<'fd>> {
        if descriptor.as_raw_descriptor() < 0 {
            return Err(DrmBoError::InvalidArgument("invalid device descriptor"));
        }

        let mut device = self.build_with_backend(vendor.backend(descriptor));
        device.vendor = Some(vendor);
        Ok(device)
    }

    /// Builds a `Device` around `backend`.
    pub fn build_with_backend<'fd>(self, backend: Box<dyn GemBackend + 'fd>) -> Device<'fd> {
        Device {
            backend,
            vendor: None,
            debug_handler: self.debug_handler,
        }
    }
}
