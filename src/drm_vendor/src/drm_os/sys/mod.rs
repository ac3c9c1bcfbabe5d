// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

#[cfg(target_os = "linux")]
pub mod unix;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub use unix as platform;
    } else {
        compile_error!("Unsupported platform");
    }
}
