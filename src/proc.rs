// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use log::warn;
use once_cell::sync::Lazy;

use crate::policy::ProcessInfo;
use crate::scheduler::ProcessSource;
use crate::scheduler::Terminator;

static PAGE_SIZE_KB: Lazy<u64> = Lazy::new(|| {
    // SAFETY: sysconf is memory safe.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };
    page_size as u64 / 1024
});

/// Enumerates the live process population from a procfs mount. The procfs
/// root is configurable so tests can point it at a fake tree.
pub struct ProcSource {
    procfs_path: PathBuf,
}

impl ProcSource {
    pub fn new() -> Self {
        Self::with_procfs_path("/proc")
    }

    pub fn with_procfs_path<P: AsRef<Path>>(procfs_path: P) -> Self {
        Self {
            procfs_path: procfs_path.as_ref().to_path_buf(),
        }
    }
}

impl Default for ProcSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for ProcSource {
    fn processes(&self) -> Box<dyn Iterator<Item = ProcessInfo> + '_> {
        let dir_entries = match fs::read_dir(&self.procfs_path) {
            Ok(dir_entries) => dir_entries,
            Err(e) => {
                warn!("procfs read_dir failed: {}", e);
                return Box::new(std::iter::empty());
            }
        };
        Box::new(dir_entries.filter_map(|dir_entry| {
            let path = dir_entry.ok()?.path();
            // Skip any directories that aren't a process.
            let pid = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|pid| pid.parse::<u32>().ok())?;
            read_process(&path, pid)
        }))
    }
}

// Reads one process's snapshot. Returns None for kernel threads, which
// have no memory context, and for processes that exited mid-scan.
fn read_process(pid_path: &Path, pid: u32) -> Option<ProcessInfo> {
    let status = read_procfs_file(&pid_path.join("status"))?;
    let mut name = None;
    let mut resident_kb = None;
    for line in status.lines() {
        if let Some(value) = line.strip_prefix("Name:") {
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("VmRSS:") {
            resident_kb = value.split_whitespace().next()?.parse::<u64>().ok();
        }
    }
    // Kernel threads carry no VmRSS line.
    let resident_kb = resident_kb?;
    let priority = read_procfs_file(&pid_path.join("oom_score_adj"))?
        .trim()
        .parse::<i32>()
        .ok()?;
    Some(ProcessInfo {
        pid,
        name: name?,
        priority,
        resident_pages: resident_kb / *PAGE_SIZE_KB,
    })
}

// Reads a procfs file. ENOENT and ESRCH just mean we raced with the
// process dying; anything else is unexpected and logged.
fn read_procfs_file(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(err) => {
            let os_err = err.raw_os_error();
            if os_err != Some(libc::ENOENT) && os_err != Some(libc::ESRCH) {
                warn!("Failed to read {}: {:?}", path.display(), err);
            }
            None
        }
    }
}

/// Fire-and-forget SIGKILL delivery. A target that already exited is
/// ignored.
pub struct SigkillTerminator;

impl Terminator for SigkillTerminator {
    fn terminate(&self, pid: u32) {
        // A pid that doesn't fit pid_t would alias a process group.
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return;
        };
        // SAFETY: kill(2) with a plain pid and signal is memory safe.
        let ret = unsafe { libc::kill(pid, libc::SIGKILL) };
        if ret != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                warn!("Failed to kill {}: {}", pid, err);
            }
        }
    }
}
