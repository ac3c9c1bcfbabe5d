// Copyright 2018 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! buffer_object: The lifecycle of a GEM buffer object.  A buffer object is allocated (or
//! imported by global name), lazily mapped, lazily exported, and torn down on drop.

use std::fmt;
use std::mem::size_of;
use std::ptr::copy_nonoverlapping;

use log::debug;
use log::error;
use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::device::Device;
use crate::drm_os::MappedRegion;
use crate::drm_os::MemoryMapping;
use crate::drm_utils::*;

/// A buffer object allocated by the kernel driver behind `Device`.  It borrows the device, and
/// through it the device node, for its whole life.
///
/// The object owns its GEM handle and its mapping.  Dropping it unmaps the buffer first and then
/// closes the handle; closing is best effort, failures go to the device's debug handler.
///
/// The cached mapping and global name are only filled in through `&mut self`, so a buffer object
/// is never mapped or exported twice.
pub struct BufferObject<'a> {
    device: &'a Device<'a>,
    handle: u32,
    name: Option<u32>,
    size: u64,
    flags: u32,
    mapping: Option<MemoryMapping>,
}

impl<'a> BufferObject<'a> {
    /// Allocates `size` bytes from `device`.  `flags` select the memory type and cache
    /// attributes and are passed to the driver untouched.
    pub fn create(
        device: &'a Device<'a>,
        size: u64,
        flags: u32,
    ) -> DrmBoResult<BufferObject<'a>> {
        if size == 0 {
            error!("invalid size.");
            return Err(DrmBoError::InvalidArgument("buffer size must not be zero"));
        }

        let handle = device.backend().allocate(size, flags).map_err(|e| {
            error!("failed to create gem object: {}", e);
            e
        })?;

        debug!(
            "{}: created handle {} ({} bytes, flags {:#x})",
            device.driver_name(),
            handle,
            size,
            flags
        );

        Ok(BufferObject {
            device,
            handle,
            name: None,
            size,
            flags,
            mapping: None,
        })
    }

    /// Imports the buffer another process exported under the global `name`.
    ///
    /// The size is whatever the driver reports for the object.  If it reports none, the object
    /// can still be shared by handle but cannot be mapped.
    pub fn from_name(device: &'a Device<'a>, name: u32) -> DrmBoResult<BufferObject<'a>> {
        let opened = device.backend().open_by_name(name).map_err(|e| {
            error!("failed to open gem object: {}", e);
            e
        })?;

        debug!(
            "{}: opened name {} as handle {}",
            device.driver_name(),
            name,
            opened.handle
        );

        Ok(BufferObject {
            device,
            handle: opened.handle,
            name: Some(name),
            size: opened.size,
            flags: 0,
            mapping: None,
        })
    }

    /// Returns the global name of this buffer, exporting it on first use.
    ///
    /// A failed export leaves the buffer unnamed, so the call can be retried.
    pub fn name(&mut self) -> DrmBoResult<u32> {
        if let Some(name) = self.name {
            return Ok(name);
        }

        let name = self.device.backend().flink(self.handle).map_err(|e| {
            error!("failed to get gem global name: {}", e);
            e
        })?;

        self.name = Some(name);
        Ok(name)
    }

    /// Maps the buffer into the process, read-write and shared, and returns its address.  Once
    /// mapped, the same address is returned for the lifetime of the object.
    pub fn map(&mut self) -> DrmBoResult<*mut u8> {
        if let Some(mapping) = &self.mapping {
            return Ok(mapping.as_ptr());
        }

        if self.size == 0 {
            error!("cannot map handle {}: size unknown", self.handle);
            return Err(DrmBoError::InvalidArgument("buffer size unknown"));
        }

        let offset = self.device.backend().map_offset(self.handle).map_err(|e| {
            error!("failed to ioctl gem map offset: {}", e);
            e
        })?;

        let size: usize = self.size.try_into()?;
        let mapping = MemoryMapping::from_descriptor(self.device, offset, size).map_err(|e| {
            error!("failed to mmap buffer: {}", e);
            e
        })?;

        let addr = mapping.as_ptr();
        self.mapping = Some(mapping);
        Ok(addr)
    }

    /// Copies `data` into the buffer at `offset`, mapping it if needed.
    pub fn write_slice(&mut self, offset: usize, data: &[u8]) -> DrmBoResult<()> {
        let addr = self.map()?;
        self.check_span(offset, data.len())?;

        // Safe because the span was checked against the mapping, which stays alive while we
        // hold `&mut self`.
        unsafe { copy_nonoverlapping(data.as_ptr(), addr.add(offset), data.len()) };
        Ok(())
    }

    /// Copies `buf.len()` bytes at `offset` out of the buffer, mapping it if needed.
    pub fn read_slice(&mut self, offset: usize, buf: &mut [u8]) -> DrmBoResult<()> {
        let addr = self.map()?;
        self.check_span(offset, buf.len())?;

        // Safe because the span was checked against the mapping.
        unsafe { copy_nonoverlapping(addr.add(offset), buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    /// Writes `val` at `offset`.
    pub fn write_obj<T: AsBytes>(&mut self, offset: usize, val: T) -> DrmBoResult<()> {
        self.write_slice(offset, val.as_bytes())
    }

    /// Reads a `T` at `offset`.
    pub fn read_obj<T: FromBytes>(&mut self, offset: usize) -> DrmBoResult<T> {
        let mut buf = vec![0u8; size_of::<T>()];
        self.read_slice(offset, &mut buf)?;
        T::read_from(&buf[..]).ok_or(DrmBoError::InvalidArgument("short read"))
    }

    fn check_span(&self, offset: usize, len: usize) -> DrmBoResult<()> {
        let end = offset
            .checked_add(len)
            .ok_or(DrmBoError::InvalidArgument("offset overflows"))?;
        let size = self.mapping.as_ref().map_or(0, |m| m.size());
        checked_range!(end; <= size)
    }

    /// The GEM handle, valid until the object is dropped.
    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// The global name, if the buffer was imported or has been exported.
    pub fn cached_name(&self) -> Option<u32> {
        self.name
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn mapping(&self) -> Option<&MemoryMapping> {
        self.mapping.as_ref()
    }

    pub fn device(&self) -> &'a Device<'a> {
        self.device
    }

    /// Tears the buffer down.  Same as dropping it.
    pub fn destroy(self) {}
}

impl Drop for BufferObject<'_> {
    fn drop(&mut self) {
        // Unmap before the handle goes away.
        self.mapping = None;

        if self.handle != 0 {
            if let Err(e) = self.device.backend().close_handle(self.handle) {
                self.device.report(DrmBoDebug {
                    handle: self.handle,
                    request: GemRequest::CloseHandle,
                    message: e.to_string(),
                });
            }
            self.handle = 0;
        }
    }
}

impl fmt::Debug for BufferObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferObject")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("flags", &self.flags)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::sync::Mutex;

    use nix::errno::Errno;

    use super::*;
    use crate::drm_os::AsRawDescriptor;
    use crate::drm_os::RawDescriptor;
    use crate::gem::open_device;
    use crate::gem::GemBackend;
    use crate::gem::GemOpen;
    use crate::gem::SystemGem;
    use crate::gem::Vendor;
    use crate::DeviceBuilder;

    #[derive(Default)]
    struct Counters {
        allocate: AtomicUsize,
        open_by_name: AtomicUsize,
        flink: AtomicUsize,
        map_offset: AtomicUsize,
        close_handle: AtomicUsize,
    }

    impl Counters {
        fn total(&self) -> usize {
            self.allocate.load(Ordering::SeqCst)
                + self.open_by_name.load(Ordering::SeqCst)
                + self.flink.load(Ordering::SeqCst)
                + self.map_offset.load(Ordering::SeqCst)
                + self.close_handle.load(Ordering::SeqCst)
        }
    }

    /// Counts the requests reaching a `SystemGem`, and can be told to reject some of them.
    struct CountingGem {
        inner: SystemGem,
        counters: Arc<Counters>,
        fail_flink: Arc<AtomicBool>,
        fail_close: bool,
        misalign_offsets: bool,
    }

    impl CountingGem {
        fn device() -> (Device<'static>, Arc<Counters>) {
            let gem = CountingGem::new();
            let counters = gem.counters.clone();
            (Device::from_backend(Box::new(gem)), counters)
        }

        fn new() -> CountingGem {
            CountingGem {
                inner: SystemGem::new().unwrap(),
                counters: Default::default(),
                fail_flink: Default::default(),
                fail_close: false,
                misalign_offsets: false,
            }
        }
    }

    impl AsRawDescriptor for CountingGem {
        fn as_raw_descriptor(&self) -> RawDescriptor {
            self.inner.as_raw_descriptor()
        }
    }

    impl GemBackend for CountingGem {
        fn driver_name(&self) -> &'static str {
            "counting"
        }

        fn allocate(&self, size: u64, flags: u32) -> DrmBoResult<u32> {
            self.counters.allocate.fetch_add(1, Ordering::SeqCst);
            self.inner.allocate(size, flags)
        }

        fn map_offset(&self, handle: u32) -> DrmBoResult<u64> {
            self.counters.map_offset.fetch_add(1, Ordering::SeqCst);
            let offset = self.inner.map_offset(handle)?;
            if self.misalign_offsets {
                return Ok(offset + 1);
            }
            Ok(offset)
        }

        fn open_by_name(&self, name: u32) -> DrmBoResult<GemOpen> {
            self.counters.open_by_name.fetch_add(1, Ordering::SeqCst);
            self.inner.open_by_name(name)
        }

        fn flink(&self, handle: u32) -> DrmBoResult<u32> {
            self.counters.flink.fetch_add(1, Ordering::SeqCst);
            if self.fail_flink.load(Ordering::SeqCst) {
                return Err(DrmBoError::DeviceError {
                    request: GemRequest::Flink,
                    errno: Errno::EACCES,
                });
            }
            self.inner.flink(handle)
        }

        fn close_handle(&self, handle: u32) -> DrmBoResult<()> {
            self.counters.close_handle.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(DrmBoError::DeviceError {
                    request: GemRequest::CloseHandle,
                    errno: Errno::EINVAL,
                });
            }
            self.inner.close_handle(handle)
        }
    }

    #[test]
    fn create_records_size_and_flags() {
        let (device, counters) = CountingGem::device();

        for size in [1, 4096, 4097, 1 << 20] {
            let bo = BufferObject::create(&device, size, 0x3).unwrap();
            assert_eq!(bo.size(), size);
            assert_eq!(bo.flags(), 0x3);
            assert_ne!(bo.handle(), 0);
            assert!(!bo.is_mapped());
            assert_eq!(bo.cached_name(), None);
        }

        assert_eq!(counters.allocate.load(Ordering::SeqCst), 4);
        assert_eq!(counters.close_handle.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn zero_size_makes_no_kernel_call() {
        let (device, counters) = CountingGem::device();

        let err = BufferObject::create(&device, 0, 0).unwrap_err();
        assert!(matches!(err, DrmBoError::InvalidArgument(_)));
        assert_eq!(counters.total(), 0);
    }

    #[test]
    fn handles_are_unique_while_alive() {
        let (device, _) = CountingGem::device();

        let a = device.create_bo(4096, 0).unwrap();
        let b = device.create_bo(4096, 0).unwrap();
        assert_ne!(a.handle(), b.handle());
    }

    #[test]
    fn map_is_idempotent() {
        let (device, counters) = CountingGem::device();
        let mut bo = device.create_bo(4096, 0).unwrap();

        let first = bo.map().unwrap();
        let second = bo.map().unwrap();
        assert_eq!(first, second);
        assert!(!first.is_null());
        assert!(bo.is_mapped());
        assert_eq!(bo.mapping().unwrap().size(), 4096);
        assert_eq!(counters.map_offset.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn name_is_idempotent() {
        let (device, counters) = CountingGem::device();
        let mut bo = device.create_bo(4096, 0).unwrap();

        let first = bo.name().unwrap();
        let second = bo.name().unwrap();
        assert_eq!(first, second);
        assert_eq!(bo.cached_name(), Some(first));
        assert_eq!(counters.flink.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_flink_can_be_retried() {
        let gem = CountingGem::new();
        let fail_flink = gem.fail_flink.clone();
        fail_flink.store(true, Ordering::SeqCst);
        let device = Device::from_backend(Box::new(gem));
        let mut bo = device.create_bo(4096, 0).unwrap();

        let err = bo.name().unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EACCES));
        assert_eq!(bo.cached_name(), None);

        fail_flink.store(false, Ordering::SeqCst);
        let name = bo.name().unwrap();
        assert_eq!(bo.cached_name(), Some(name));
    }

    #[test]
    fn map_offset_failure_leaves_object_unmapped() {
        let (device, counters) = CountingGem::device();
        let mut bo = device.create_bo(4096, 0).unwrap();
        let mut imported = device.bo_from_name(bo.name().unwrap()).unwrap();

        // Closing the original handle does not invalidate the imported one.
        drop(bo);
        assert!(imported.map().is_ok());

        let mut stale = device.create_bo(4096, 0).unwrap();
        device.backend().close_handle(stale.handle()).unwrap();
        let err = stale.map().unwrap_err();
        assert!(matches!(
            err,
            DrmBoError::DeviceError {
                request: GemRequest::MapOffset,
                ..
            }
        ));
        assert!(!stale.is_mapped());
        assert_eq!(counters.map_offset.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn mmap_failure_is_a_mapping_error() {
        let mut gem = CountingGem::new();
        gem.misalign_offsets = true;
        let device = Device::from_backend(Box::new(gem));
        let mut bo = device.create_bo(4096, 0).unwrap();

        let err = bo.map().unwrap_err();
        assert!(matches!(err, DrmBoError::MappingError(Errno::EINVAL)));
        assert!(!bo.is_mapped());
    }

    #[test]
    fn import_by_name_shares_memory() {
        let (device, _) = CountingGem::device();

        let mut bo = BufferObject::create(&device, 4096, 0).unwrap();
        bo.map().unwrap();
        bo.write_obj(0, 0xa5u8).unwrap();
        let name = bo.name().unwrap();

        let mut imported = BufferObject::from_name(&device, name).unwrap();
        assert_ne!(imported.handle(), bo.handle());
        assert_eq!(imported.cached_name(), Some(name));
        assert_eq!(imported.name().unwrap(), name);
        imported.map().unwrap();
        assert_eq!(imported.read_obj::<u8>(0).unwrap(), 0xa5);

        // And the other way around.
        imported.write_obj(64, 0xdead_beefu32).unwrap();
        assert_eq!(bo.read_obj::<u32>(64).unwrap(), 0xdead_beef);
    }

    #[test]
    fn import_of_unknown_name_fails() {
        let (device, counters) = CountingGem::device();

        let err = BufferObject::from_name(&device, 1234).unwrap_err();
        assert!(matches!(
            err,
            DrmBoError::DeviceError {
                request: GemRequest::OpenByName,
                errno: Errno::ENOENT,
            }
        ));
        // Nothing was opened, so nothing is closed.
        assert_eq!(counters.close_handle.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn accessors_are_bounds_checked() {
        let (device, _) = CountingGem::device();
        let mut bo = device.create_bo(16, 0).unwrap();

        bo.write_slice(8, &[1; 8]).unwrap();
        assert!(matches!(
            bo.write_slice(12, &[1; 8]),
            Err(DrmBoError::CheckedRange { .. })
        ));
        assert!(matches!(
            bo.read_slice(usize::MAX, &mut [0; 2]),
            Err(DrmBoError::InvalidArgument(_))
        ));

        let mut buf = [0u8; 8];
        bo.read_slice(8, &mut buf).unwrap();
        assert_eq!(buf, [1; 8]);
    }

    #[test]
    fn destroy_unmaps_and_closes() {
        let gem = SystemGem::new().unwrap();
        let device = Device::from_backend(Box::new(gem));
        let mut bo = device.create_bo(4096, 0).unwrap();
        let handle = bo.handle();
        bo.map().unwrap();

        bo.destroy();
        assert!(device.backend().map_offset(handle).is_err());
    }

    #[test]
    fn close_failure_goes_to_debug_handler() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let handler = DrmBoDebugHandler::new(move |debug: DrmBoDebug| {
            sink.lock().unwrap().push(debug);
        });

        let mut gem = CountingGem::new();
        gem.fail_close = true;
        let device = DeviceBuilder::new()
            .set_debug_handler(Some(handler))
            .build_with_backend(Box::new(gem));

        let handle = {
            let mut bo = device.create_bo(4096, 0).unwrap();
            bo.map().unwrap();
            bo.handle()
        };

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].handle, handle);
        assert_eq!(reports[0].request, GemRequest::CloseHandle);
    }

    #[test]
    fn imported_object_without_size_cannot_be_mapped() {
        struct Sizeless(SystemGem);

        impl AsRawDescriptor for Sizeless {
            fn as_raw_descriptor(&self) -> RawDescriptor {
                self.0.as_raw_descriptor()
            }
        }

        impl GemBackend for Sizeless {
            fn driver_name(&self) -> &'static str {
                "sizeless"
            }

            fn allocate(&self, size: u64, flags: u32) -> DrmBoResult<u32> {
                self.0.allocate(size, flags)
            }

            fn map_offset(&self, handle: u32) -> DrmBoResult<u64> {
                self.0.map_offset(handle)
            }

            fn open_by_name(&self, name: u32) -> DrmBoResult<GemOpen> {
                let opened = self.0.open_by_name(name)?;
                Ok(GemOpen { size: 0, ..opened })
            }

            fn flink(&self, handle: u32) -> DrmBoResult<u32> {
                self.0.flink(handle)
            }

            fn close_handle(&self, handle: u32) -> DrmBoResult<()> {
                self.0.close_handle(handle)
            }
        }

        let device = Device::from_backend(Box::new(Sizeless(SystemGem::new().unwrap())));
        let mut bo = device.create_bo(4096, 0).unwrap();
        let mut imported = device.bo_from_name(bo.name().unwrap()).unwrap();

        assert_eq!(imported.size(), 0);
        assert!(matches!(
            imported.map(),
            Err(DrmBoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn share_marker_through_hardware() {
        for vendor in [Vendor::Mediatek, Vendor::Exynos, Vendor::Rockchip] {
            let file: File = match open_device(vendor.driver_name()) {
                Ok(file) => file,
                Err(_) => continue,
            };

            let device = Device::new(&file, vendor).unwrap();
            let mut bo = device.create_bo(4096, 0).unwrap();
            bo.write_obj(0, 0x5au8).unwrap();

            let mut imported = device.bo_from_name(bo.name().unwrap()).unwrap();
            assert_eq!(imported.read_obj::<u8>(0).unwrap(), 0x5a);
        }
    }
}
