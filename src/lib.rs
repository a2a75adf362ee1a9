// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Userspace rendition of the low-memory kill policy: configuration pairs a
// set of free-page thresholds with minimum badness values. When free memory
// and file cache both drop below a threshold, one process at or above the
// paired badness value is selected and killed, with at most one kill
// outstanding at a time. Configured process names can be preserved from
// killing; they are only considered once no ordinary candidate is left.

pub mod config;
pub mod policy;
pub mod proc;
pub mod scheduler;
mod sync;
pub mod vmstat;

pub use config::ProtectionList;
pub use config::ReclaimConfig;
pub use config::ThresholdEntry;
pub use policy::ProcessClass;
pub use policy::ProcessInfo;
pub use scheduler::ProcessSource;
pub use scheduler::ReclaimScheduler;
pub use scheduler::Terminator;
pub use vmstat::Vmstat;
