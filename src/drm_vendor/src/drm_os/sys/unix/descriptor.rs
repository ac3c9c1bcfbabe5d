// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::OwnedFd;
use std::os::unix::io::RawFd;

use crate::drm_os::descriptor::AsRawDescriptor;

pub type RawDescriptor = RawFd;

impl AsRawDescriptor for File {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.as_raw_fd()
    }
}

impl AsRawDescriptor for OwnedFd {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.as_raw_fd()
    }
}
