// Copyright 2020 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! drm_utils: Utility enums, structs, and implementations needed by the rest of the crate.

use std::collections::TryReserveError;
use std::fmt;
use std::io::Error as IoError;
use std::num::TryFromIntError;
use std::sync::Arc;

#[cfg(unix)]
use nix::errno::Errno;
use remain::sorted;
use thiserror::Error;

/// The kernel requests issued on behalf of a buffer object.  Carried by
/// `DrmBoError::DeviceError` so a failure can be traced back to the ioctl that caused it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GemRequest {
    Allocate,
    OpenByName,
    Flink,
    MapOffset,
    CloseHandle,
    Version,
}

impl fmt::Display for GemRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GemRequest::Allocate => "allocate",
            GemRequest::OpenByName => "open by name",
            GemRequest::Flink => "flink",
            GemRequest::MapOffset => "map offset",
            GemRequest::CloseHandle => "close handle",
            GemRequest::Version => "version",
        };
        write!(f, "{}", name)
    }
}

/// An error generated while using this crate.
#[sorted]
#[derive(Error, Debug)]
pub enum DrmBoError {
    /// Local memory for a wrapper or a bookkeeping table could not be obtained.
    #[error("failed to allocate local memory: {0}")]
    AllocationError(TryReserveError),
    /// Checked Range error
    #[error("range check failed: {}({}) vs {}({})", .field1.0, .field1.1, .field2.0, .field2.1)]
    CheckedRange {
        field1: (&'static str, usize),
        field2: (&'static str, usize),
    },
    /// The kernel driver rejected a request.
    #[cfg(unix)]
    #[error("{request} request failed: {errno}")]
    DeviceError { request: GemRequest, errno: Errno },
    /// A precondition was violated before any kernel call was made.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// An input/output error occured.
    #[error("an input/output error occur: {0}")]
    IoError(IoError),
    /// The map-offset request succeeded but mapping it into the process failed.
    #[cfg(unix)]
    #[error("failed to mmap buffer: {0}")]
    MappingError(Errno),
    /// Nix crate error.
    #[cfg(unix)]
    #[error("The errno is {0}")]
    NixError(Errno),
    /// No device node is driven by the requested driver.
    #[error("no DRM device found for driver {0}")]
    NoDevice(String),
    /// An attempted integer conversion failed.
    #[error("int conversion failed: {0}")]
    TryFromIntError(TryFromIntError),
    /// The request is unsupported by this backend.
    #[error("the requested function is not implemented")]
    Unsupported,
}

impl DrmBoError {
    /// Returns the OS error code behind this error, if there is one.
    #[cfg(unix)]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            DrmBoError::DeviceError { errno, .. } => Some(*errno),
            DrmBoError::MappingError(errno) => Some(*errno),
            DrmBoError::NixError(errno) => Some(*errno),
            DrmBoError::IoError(e) => e.raw_os_error().map(Errno::from_raw),
            _ => None,
        }
    }
}

#[cfg(unix)]
impl From<Errno> for DrmBoError {
    fn from(e: Errno) -> DrmBoError {
        DrmBoError::NixError(e)
    }
}

impl From<IoError> for DrmBoError {
    fn from(e: IoError) -> DrmBoError {
        DrmBoError::IoError(e)
    }
}

impl From<TryFromIntError> for DrmBoError {
    fn from(e: TryFromIntError) -> DrmBoError {
        DrmBoError::TryFromIntError(e)
    }
}

impl From<TryReserveError> for DrmBoError {
    fn from(e: TryReserveError) -> DrmBoError {
        DrmBoError::AllocationError(e)
    }
}

/// The result of an operation in this crate.
pub type DrmBoResult<T> = std::result::Result<T, DrmBoError>;

/// A failure that could not be returned to the caller, e.g. while tearing down a buffer object.
#[derive(Clone, Debug)]
pub struct DrmBoDebug {
    pub handle: u32,
    pub request: GemRequest,
    pub message: String,
}

#[derive(Clone)]
pub struct DrmBoHandler<S> {
    closure: Arc<dyn Fn(S) + Send + Sync>,
}

impl<S> DrmBoHandler<S>
where
    S: Send + Sync + Clone + 'static,
{
    pub fn new(closure: impl Fn(S) + Send + Sync + 'static) -> DrmBoHandler<S> {
        DrmBoHandler {
            closure: Arc::new(closure),
        }
    }

    pub fn call(&self, data: S) {
        (self.closure)(data)
    }
}

impl<S> fmt::Debug for DrmBoHandler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure debug").finish()
    }
}

pub type DrmBoDebugHandler = DrmBoHandler<DrmBoDebug>;
