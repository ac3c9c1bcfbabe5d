// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A GEM backend allocating from system memory.  A memfd stands in for the device node: every
//! object owns a page-aligned range of it, and that range's start is the object's map offset,
//! the same fake-offset scheme DRM drivers use.

use std::collections::BTreeMap as Map;
use std::sync::Mutex;
use std::sync::MutexGuard;

use log::warn;
use nix::errno::Errno;

use crate::drm_os::round_up_to_page_size;
use crate::drm_os::AsRawDescriptor;
use crate::drm_os::RawDescriptor;
use crate::drm_os::SharedMemory;
use crate::drm_utils::*;
use crate::gem::GemBackend;
use crate::gem::GemOpen;

struct GemObject {
    size: u64,
    handle_count: u32,
    name: Option<u32>,
}

/// Objects are keyed by their offset in the memfd.  Released ranges are punched out and kept in
/// `free`, merged with their neighbours, and handed out again first fit; the memfd only grows when
/// no free range is large enough, so its size is bounded by the peak of live allocations.
struct SystemGemState {
    shm: SharedMemory,
    objects: Map<u64, GemObject>,
    handles: Map<u32, u64>,
    names: Map<u32, u64>,
    free: Map<u64, u64>,
    next_handle: u32,
    next_name: u32,
}

fn rejected(request: GemRequest, errno: Errno) -> DrmBoError {
    DrmBoError::DeviceError { request, errno }
}

/// Hands out `*next` and advances it.  Zero is never handed out, and running out of ids fails
/// with ENOSPC instead of wrapping around to it.
fn take_id(next: &mut u32, request: GemRequest) -> DrmBoResult<u32> {
    let id = *next;
    *next = id
        .checked_add(1)
        .ok_or_else(|| rejected(request, Errno::ENOSPC))?;
    Ok(id)
}

impl SystemGemState {
    fn object_offset(&self, request: GemRequest, handle: u32) -> DrmBoResult<u64> {
        self.handles
            .get(&handle)
            .copied()
            .ok_or_else(|| rejected(request, Errno::ENOENT))
    }

    fn object_mut(&mut self, request: GemRequest, offset: u64) -> DrmBoResult<&mut GemObject> {
        self.objects
            .get_mut(&offset)
            .ok_or_else(|| rejected(request, Errno::ENOENT))
    }

    fn new_handle(&mut self, request: GemRequest, offset: u64) -> DrmBoResult<u32> {
        let handle = take_id(&mut self.next_handle, request)?;
        self.object_mut(request, offset)?.handle_count += 1;
        self.handles.insert(handle, offset);
        Ok(handle)
    }

    /// Finds room for `size` bytes, reusing a released range when one fits.
    fn reserve_range(&mut self, size: u64) -> DrmBoResult<u64> {
        let fit = self
            .free
            .iter()
            .find(|(_, len)| **len >= size)
            .map(|(offset, len)| (*offset, *len));

        if let Some((offset, len)) = fit {
            self.free.remove(&offset);
            if len > size {
                self.free.insert(offset + size, len - size);
            }
            return Ok(offset);
        }

        // A released range at the end of the memfd is extended rather than left behind.
        let end = self.shm.size();
        let offset = match self.free.iter().next_back() {
            Some((offset, len)) if offset + len == end => *offset,
            _ => end,
        };
        let new_end = offset
            .checked_add(size)
            .ok_or_else(|| rejected(GemRequest::Allocate, Errno::ENOMEM))?;

        self.shm
            .set_size(new_end)
            .map_err(|e| rejected(GemRequest::Allocate, e.errno().unwrap_or(Errno::ENOMEM)))?;
        self.free.remove(&offset);
        Ok(offset)
    }

    fn release(&mut self, offset: u64) {
        let object = match self.objects.remove(&offset) {
            Some(object) => object,
            None => return,
        };

        if let Some(name) = object.name {
            self.names.remove(&name);
        }

        if let Err(e) = self.shm.punch_hole(offset, object.size) {
            warn!("failed to release gem object at {:#x}: {}", offset, e);
        }

        let mut start = offset;
        let mut len = object.size;
        if let Some((&prev, &prev_len)) = self.free.range(..offset).next_back() {
            if prev + prev_len == offset {
                self.free.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.free.remove(&(offset + object.size)) {
            len += next_len;
        }
        self.free.insert(start, len);
    }
}

/// A GEM backend capable of allocation from system memory.
pub struct SystemGem {
    descriptor: RawDescriptor,
    state: Mutex<SystemGemState>,
}

impl SystemGem {
    pub fn new() -> DrmBoResult<SystemGem> {
        let shm = SharedMemory::new("drm_vendor_system_gem", 0)?;
        Ok(SystemGem {
            descriptor: shm.as_raw_descriptor(),
            state: Mutex::new(SystemGemState {
                shm,
                objects: Default::default(),
                handles: Default::default(),
                names: Default::default(),
                free: Default::default(),
                next_handle: 1,
                next_name: 1,
            }),
        })
    }

    /// Returns a new `SystemGem` instance.
    pub fn init() -> DrmBoResult<Box<dyn GemBackend>> {
        Ok(Box::new(SystemGem::new()?))
    }

    /// Number of objects that still have at least one open handle.
    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Size of the memfd backing every object.
    pub fn backing_size(&self) -> u64 {
        self.lock().shm.size()
    }

    fn lock(&self) -> MutexGuard<'_, SystemGemState> {
        match self.state.lock() {
            Ok(guard) => guard,
            // The tables are updated before any call that can panic, so they stay consistent.
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl AsRawDescriptor for SystemGem {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.descriptor
    }
}

impl GemBackend for SystemGem {
    fn driver_name(&self) -> &'static str {
        "system"
    }

    fn allocate(&self, size: u64, _flags: u32) -> DrmBoResult<u32> {
        if size == 0 {
            return Err(rejected(GemRequest::Allocate, Errno::EINVAL));
        }

        let size = round_up_to_page_size(size)?;
        let mut state = self.lock();
        let handle = take_id(&mut state.next_handle, GemRequest::Allocate)?;
        let offset = state.reserve_range(size)?;

        state.objects.insert(
            offset,
            GemObject {
                size,
                handle_count: 1,
                name: None,
            },
        );
        state.handles.insert(handle, offset);
        Ok(handle)
    }

    fn map_offset(&self, handle: u32) -> DrmBoResult<u64> {
        self.lock().object_offset(GemRequest::MapOffset, handle)
    }

    fn open_by_name(&self, name: u32) -> DrmBoResult<GemOpen> {
        let mut state = self.lock();
        let offset = state
            .names
            .get(&name)
            .copied()
            .ok_or_else(|| rejected(GemRequest::OpenByName, Errno::ENOENT))?;

        let handle = state.new_handle(GemRequest::OpenByName, offset)?;
        let size = state.object_mut(GemRequest::OpenByName, offset)?.size;
        Ok(GemOpen { handle, size })
    }

    fn flink(&self, handle: u32) -> DrmBoResult<u32> {
        let mut state = self.lock();
        let offset = state.object_offset(GemRequest::Flink, handle)?;

        if let Some(name) = state.object_mut(GemRequest::Flink, offset)?.name {
            return Ok(name);
        }

        let name = take_id(&mut state.next_name, GemRequest::Flink)?;
        state.names.insert(name, offset);
        state.object_mut(GemRequest::Flink, offset)?.name = Some(name);
        Ok(name)
    }

    fn close_handle(&self, handle: u32) -> DrmBoResult<()> {
        let mut state = self.lock();
        let offset = state
            .handles
            .remove(&handle)
            .ok_or_else(|| rejected(GemRequest::CloseHandle, Errno::EINVAL))?;

        let object = state.object_mut(GemRequest::CloseHandle, offset)?;
        object.handle_count -= 1;
        if object.handle_count == 0 {
            state.release(offset);
        }
        Ok(())
    }
}
