// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use log::debug;

use crate::config::ReclaimConfig;
use crate::config::ThresholdEntry;

/// Protection class of a process. Determines the fallback order when no
/// ordinary kill candidate exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ProcessClass {
    Killable = 0,
    ProtectedUser = 1,
    ProtectedSystem = 2,
}

impl ProcessClass {
    pub const COUNT: usize = 3;

    /// Kill a killable process if one was found. Only when there is none,
    /// kill a protected user process, and as the very last resort a
    /// protected system process, to prevent system slowdowns and hangs.
    pub const FALLBACK_ORDER: [ProcessClass; Self::COUNT] = [
        ProcessClass::Killable,
        ProcessClass::ProtectedUser,
        ProcessClass::ProtectedSystem,
    ];
}

/// Read-only snapshot of one live process, valid for a single scan pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    /// Badness value, higher is more killable.
    pub priority: i32,
    pub resident_pages: u64,
}

/// Walk the threshold table in ascending free-page order and return the
/// badness floor of the first entry both counts fall below, or None when
/// the system is healthy. File cache counts as free here; only memory
/// scarce on both axes triggers a kill.
pub fn resolve_min_priority(
    thresholds: &[ThresholdEntry],
    free_pages: u64,
    file_pages: u64,
) -> Option<i32> {
    thresholds
        .iter()
        .find(|entry| free_pages < entry.min_free_pages && file_pages < entry.min_free_pages)
        .map(|entry| entry.min_priority)
}

/// Classify a process by name. The user list takes precedence over the
/// system list; a process is classified exactly once per scan pass.
pub fn classify(config: &ReclaimConfig, name: &str) -> ProcessClass {
    if config.protected_procs.matches(name) {
        ProcessClass::ProtectedUser
    } else if config.protected_sysprocs.matches(name) {
        ProcessClass::ProtectedSystem
    } else {
        ProcessClass::Killable
    }
}

/// Best kill candidate found so far for each protection class. Scan-local,
/// discarded after the pass.
#[derive(Debug, Default)]
pub struct SelectionState {
    selected: [Option<ProcessInfo>; ProcessClass::COUNT],
}

impl SelectionState {
    /// Offer a process as the candidate for its class. Keeps whichever of
    /// the current best and the offer is more killable: the higher badness
    /// value wins, and at equal badness the larger resident size wins.
    /// Returns true if the offer became the new best.
    fn consider(&mut self, class: ProcessClass, process: ProcessInfo) -> bool {
        let slot = &mut self.selected[class as usize];
        if let Some(best) = slot {
            if process.priority < best.priority {
                return false;
            }
            if process.priority == best.priority && process.resident_pages <= best.resident_pages {
                return false;
            }
        }
        *slot = Some(process);
        true
    }

    pub fn best(&self, class: ProcessClass) -> Option<&ProcessInfo> {
        self.selected[class as usize].as_ref()
    }
}

/// One pass over the live process population, recording the best candidate
/// per protection class. A process must carry a badness value of at least
/// `min_priority` and have resident memory to be considered at all.
pub fn scan_candidates<I>(
    config: &ReclaimConfig,
    processes: I,
    min_priority: i32,
) -> SelectionState
where
    I: IntoIterator<Item = ProcessInfo>,
{
    let mut state = SelectionState::default();
    for process in processes {
        if process.priority < min_priority {
            continue;
        }
        if process.resident_pages == 0 {
            continue;
        }
        let class = classify(config, &process.name);
        if class != ProcessClass::Killable && config.debug_level >= 2 {
            debug!("process '{}' is preserved from killing ({:?})", process.name, class);
        }
        if state.consider(class, process) && config.debug_level >= 2 {
            // consider() stored the offer, so best() is non-empty.
            if let Some(best) = state.best(class) {
                debug!(
                    "select {} ({}), adj {}, size {} pages, to kill",
                    best.pid, best.name, best.priority, best.resident_pages
                );
            }
        }
    }
    state
}

/// Pick the single process to terminate: the first non-empty class best in
/// fallback order, even if a protected candidate is more severely over
/// threshold than the killable one.
pub fn select_victim(state: &SelectionState) -> Option<&ProcessInfo> {
    ProcessClass::FALLBACK_ORDER
        .iter()
        .find_map(|class| state.best(*class))
}
