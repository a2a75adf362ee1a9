// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use log::debug;
use log::info;

use crate::config::ReclaimConfig;
use crate::policy;
use crate::policy::ProcessInfo;
use crate::sync::NoPoison;
use crate::vmstat::Vmstat;

/// How long an issued kill stays outstanding before the scheduler stops
/// waiting for its exit notification. One scheduling tick, so a lost
/// notification cannot stall reclaim for longer than that.
pub const KILL_TIMEOUT: Duration = Duration::from_secs(1);

/// Supplies the live process population for one scan pass. Entries that
/// disappear while the snapshot is taken are simply absent.
pub trait ProcessSource {
    fn processes(&self) -> Box<dyn Iterator<Item = ProcessInfo> + '_>;
}

/// Delivers the termination signal. Must not block, and must tolerate a
/// target that has already exited.
pub trait Terminator {
    fn terminate(&self, pid: u32);
}

/// A kill that has been issued but not yet confirmed dead by an exit
/// notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingKill {
    pub pid: u32,
    pub expires_at: Instant,
}

/// The reclaim control loop. Scan triggers arrive one at a time; exit
/// notifications arrive asynchronously relative to them.
pub struct ReclaimScheduler<S, T> {
    config: Mutex<ReclaimConfig>,
    source: S,
    terminator: T,
    // At most one kill is outstanding at any time. Shared between the scan
    // path and the exit-notification path.
    pending: Mutex<Option<PendingKill>>,
}

impl<S: ProcessSource, T: Terminator> ReclaimScheduler<S, T> {
    pub fn new(config: ReclaimConfig, source: S, terminator: T) -> Self {
        Self {
            config: Mutex::new(config),
            source,
            terminator,
            pending: Mutex::new(None),
        }
    }

    /// Replace the configuration wholesale. Takes effect on the next scan.
    pub fn set_config(&self, config: ReclaimConfig) {
        *self.config.do_lock() = config;
    }

    /// Entry point for the host's pressure-scan trigger. `nr_to_scan` of
    /// zero or less reports the current reclaimable estimate without
    /// selecting a victim.
    pub fn on_pressure_scan(&self, nr_to_scan: i64) -> io::Result<u64> {
        let snapshot = Vmstat::load()?;
        Ok(self.scan(nr_to_scan, &snapshot, Instant::now()))
    }

    /// One policy pass against the given memory snapshot. Returns the total
    /// reclaimable page count, minus the victim's resident pages when a
    /// kill was issued, or zero while a previous kill is still outstanding.
    pub fn scan(&self, nr_to_scan: i64, snapshot: &Vmstat, now: Instant) -> u64 {
        // If we already have a death outstanding, bail out right away; we
        // have nothing further to offer on this pass.
        {
            let mut pending = self.pending.do_lock();
            if let Some(kill) = *pending {
                if now <= kill.expires_at {
                    return 0;
                }
                // Expired without a notification; assume it was lost and
                // let this pass evaluate candidates again.
                *pending = None;
            }
        }

        let config = self.config.do_lock().clone();
        let other_free = snapshot.other_free();
        let other_file = snapshot.other_file();
        let min_priority =
            policy::resolve_min_priority(&config.thresholds, other_free, other_file);
        if nr_to_scan > 0 && config.debug_level >= 3 {
            debug!(
                "scan {}, ofree {} {}, ma {:?}",
                nr_to_scan, other_free, other_file, min_priority
            );
        }

        let mut reclaimable = snapshot.reclaimable_pages();
        let min_priority = match min_priority {
            Some(min_priority) if nr_to_scan > 0 => min_priority,
            // Healthy system or report-only trigger: no selection, just the
            // estimate.
            _ => {
                if config.debug_level >= 5 {
                    debug!("scan {}, return {}", nr_to_scan, reclaimable);
                }
                return reclaimable;
            }
        };

        let state = policy::scan_candidates(&config, self.source.processes(), min_priority);
        if let Some(victim) = policy::select_victim(&state) {
            if config.debug_level >= 1 {
                info!(
                    "send sigkill to {} ({}), adj {}, size {} pages",
                    victim.pid, victim.name, victim.priority, victim.resident_pages
                );
            }
            // Fire and forget; if the victim exited between selection and
            // here, the timeout recovers the pending slot.
            self.terminator.terminate(victim.pid);
            *self.pending.do_lock() = Some(PendingKill {
                pid: victim.pid,
                expires_at: now + KILL_TIMEOUT,
            });
            reclaimable = reclaimable.saturating_sub(victim.resident_pages);
        }
        if config.debug_level >= 4 {
            debug!("scan {}, return {}", nr_to_scan, reclaimable);
        }
        reclaimable
    }

    /// Exit-notification entry point. Clears the pending kill when the
    /// process it names has finished dying; exits of any other process are
    /// ignored.
    pub fn on_process_exit(&self, pid: u32) {
        let mut pending = self.pending.do_lock();
        if pending.map_or(false, |kill| kill.pid == pid) {
            *pending = None;
        }
    }

    /// The kill currently outstanding, if any. The caller is expected to
    /// subscribe to exit notifications for exactly this process.
    pub fn pending_kill(&self) -> Option<PendingKill> {
        *self.pending.do_lock()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::ProtectionList;

    struct FakeSource {
        processes: Vec<ProcessInfo>,
    }

    impl ProcessSource for FakeSource {
        fn processes(&self) -> Box<dyn Iterator<Item = ProcessInfo> + '_> {
            Box::new(self.processes.iter().cloned())
        }
    }

    #[derive(Default)]
    struct RecordingTerminator {
        killed: Mutex<Vec<u32>>,
    }

    impl Terminator for &RecordingTerminator {
        fn terminate(&self, pid: u32) {
            self.killed.lock().unwrap().push(pid);
        }
    }

    fn process(pid: u32, name: &str, priority: i32, resident_pages: u64) -> ProcessInfo {
        ProcessInfo {
            pid,
            name: name.to_string(),
            priority,
            resident_pages,
        }
    }

    // Free and file cache both below every default threshold.
    fn pressured_snapshot() -> Vmstat {
        Vmstat {
            nr_free_pages: 100,
            nr_file_pages: 100,
            nr_active_anon: 4000,
            nr_inactive_anon: 1000,
            nr_active_file: 2000,
            nr_inactive_file: 3000,
            ..Default::default()
        }
    }

    fn healthy_snapshot() -> Vmstat {
        Vmstat {
            nr_free_pages: 1 << 20,
            nr_file_pages: 1 << 20,
            nr_active_anon: 4000,
            nr_inactive_anon: 1000,
            nr_active_file: 2000,
            nr_inactive_file: 3000,
            ..Default::default()
        }
    }

    fn scheduler<'a>(
        config: ReclaimConfig,
        processes: Vec<ProcessInfo>,
        terminator: &'a RecordingTerminator,
    ) -> ReclaimScheduler<FakeSource, &'a RecordingTerminator> {
        ReclaimScheduler::new(config, FakeSource { processes }, terminator)
    }

    #[test]
    fn test_healthy_system_reports_estimate_only() {
        let terminator = RecordingTerminator::default();
        let scheduler = scheduler(
            ReclaimConfig::default(),
            vec![process(10, "renderer", 10, 500)],
            &terminator,
        );

        let reclaimable = scheduler.scan(128, &healthy_snapshot(), Instant::now());
        assert_eq!(reclaimable, 10000);
        assert!(terminator.killed.lock().unwrap().is_empty());
        assert_eq!(scheduler.pending_kill(), None);
    }

    #[test]
    fn test_report_only_trigger_never_kills() {
        let terminator = RecordingTerminator::default();
        let scheduler = scheduler(
            ReclaimConfig::default(),
            vec![process(10, "renderer", 10, 500)],
            &terminator,
        );

        let reclaimable = scheduler.scan(0, &pressured_snapshot(), Instant::now());
        assert_eq!(reclaimable, 10000);
        assert!(terminator.killed.lock().unwrap().is_empty());

        let reclaimable = scheduler.scan(-1, &pressured_snapshot(), Instant::now());
        assert_eq!(reclaimable, 10000);
        assert!(terminator.killed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_pressure_kills_best_candidate() {
        let terminator = RecordingTerminator::default();
        let scheduler = scheduler(
            ReclaimConfig::default(),
            vec![
                process(10, "renderer", 10, 500),
                process(11, "tab", 12, 300),
            ],
            &terminator,
        );

        let now = Instant::now();
        let reclaimable = scheduler.scan(128, &pressured_snapshot(), now);
        // Victim resident size subtracted from the estimate.
        assert_eq!(reclaimable, 10000 - 300);
        assert_eq!(*terminator.killed.lock().unwrap(), vec![11]);

        let pending = scheduler.pending_kill().unwrap();
        assert_eq!(pending.pid, 11);
        assert_eq!(pending.expires_at, now + KILL_TIMEOUT);
    }

    #[test]
    fn test_cooldown_blocks_second_kill() {
        let terminator = RecordingTerminator::default();
        let scheduler = scheduler(
            ReclaimConfig::default(),
            vec![process(10, "renderer", 10, 500)],
            &terminator,
        );

        let now = Instant::now();
        scheduler.scan(128, &pressured_snapshot(), now);
        assert_eq!(terminator.killed.lock().unwrap().len(), 1);

        // A second trigger before expiry performs no evaluation and reports
        // zero, even at the expiry instant itself.
        assert_eq!(
            scheduler.scan(128, &pressured_snapshot(), now + Duration::from_millis(10)),
            0
        );
        assert_eq!(scheduler.scan(128, &pressured_snapshot(), now + KILL_TIMEOUT), 0);
        assert_eq!(terminator.killed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_exit_notification_clears_cooldown() {
        let terminator = RecordingTerminator::default();
        let scheduler = scheduler(
            ReclaimConfig::default(),
            vec![process(10, "renderer", 10, 500)],
            &terminator,
        );

        let now = Instant::now();
        scheduler.scan(128, &pressured_snapshot(), now);

        // An exit of some other process does not clear the pending kill.
        scheduler.on_process_exit(9999);
        assert!(scheduler.pending_kill().is_some());

        scheduler.on_process_exit(10);
        assert_eq!(scheduler.pending_kill(), None);

        // The very next trigger may kill again.
        scheduler.scan(128, &pressured_snapshot(), now + Duration::from_millis(10));
        assert_eq!(*terminator.killed.lock().unwrap(), vec![10, 10]);
    }

    #[test]
    fn test_lost_notification_expires() {
        let terminator = RecordingTerminator::default();
        let scheduler = scheduler(
            ReclaimConfig::default(),
            vec![process(10, "renderer", 10, 500)],
            &terminator,
        );

        let now = Instant::now();
        scheduler.scan(128, &pressured_snapshot(), now);

        // No notification ever arrives; once the timeout has elapsed the
        // next trigger proceeds to a fresh scan.
        let after_expiry = now + KILL_TIMEOUT + Duration::from_millis(1);
        let reclaimable = scheduler.scan(128, &pressured_snapshot(), after_expiry);
        assert_eq!(reclaimable, 10000 - 500);
        assert_eq!(terminator.killed.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_no_eligible_candidate_is_not_an_error() {
        let terminator = RecordingTerminator::default();
        // Every process sits below the resolved badness floor.
        let scheduler = scheduler(
            ReclaimConfig::default(),
            vec![process(10, "important", -500, 500)],
            &terminator,
        );

        let reclaimable = scheduler.scan(128, &pressured_snapshot(), Instant::now());
        assert_eq!(reclaimable, 10000);
        assert!(terminator.killed.lock().unwrap().is_empty());
        assert_eq!(scheduler.pending_kill(), None);
    }

    #[test]
    fn test_protected_candidate_is_last_resort() {
        let mut config = ReclaimConfig::default();
        config.protected_sysprocs =
            ProtectionList::new(true, vec!["system_server".to_string()]);
        let terminator = RecordingTerminator::default();
        let scheduler = scheduler(
            config,
            vec![process(10, "system_server", 10, 4000)],
            &terminator,
        );

        // Nothing killable is alive, so the protected process is chosen
        // rather than stalling reclaim entirely.
        let reclaimable = scheduler.scan(128, &pressured_snapshot(), Instant::now());
        assert_eq!(reclaimable, 10000 - 4000);
        assert_eq!(*terminator.killed.lock().unwrap(), vec![10]);
    }

    #[test]
    fn test_victim_larger_than_estimate_saturates() {
        let terminator = RecordingTerminator::default();
        let scheduler = scheduler(
            ReclaimConfig::default(),
            vec![process(10, "renderer", 10, 1 << 40)],
            &terminator,
        );

        let reclaimable = scheduler.scan(128, &pressured_snapshot(), Instant::now());
        assert_eq!(reclaimable, 0);
    }

    #[test]
    fn test_set_config_applies_to_next_scan() {
        let terminator = RecordingTerminator::default();
        let scheduler = scheduler(
            ReclaimConfig::default(),
            vec![process(10, "renderer", 10, 500)],
            &terminator,
        );

        // An empty threshold table never matches, so no kill happens.
        scheduler.set_config(ReclaimConfig::from_tables(&[], &[]));
        let reclaimable = scheduler.scan(128, &pressured_snapshot(), Instant::now());
        assert_eq!(reclaimable, 10000);
        assert!(terminator.killed.lock().unwrap().is_empty());

        scheduler.set_config(ReclaimConfig::default());
        scheduler.scan(128, &pressured_snapshot(), Instant::now());
        assert_eq!(*terminator.killed.lock().unwrap(), vec![10]);
    }
}
