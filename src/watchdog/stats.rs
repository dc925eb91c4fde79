//! Process-lifetime counters of watchdog activity.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WatchdogStats {
    /// Check cycles evaluated
    pub checks: u64,
    /// Check cycles skipped because the scheduler was gone
    pub skipped_checks: u64,
    pub warnings: u64,
    pub freezes: u64,
    pub recoveries: u64,
    pub anrs: u64,
    pub dialogs: u64,
    /// Seconds since the watchdog started
    pub uptime_secs: u64,
}

/// Lock-free collector shared by the monitor and the public handle
#[derive(Debug)]
pub struct StatsCollector {
    checks: AtomicU64,
    skipped_checks: AtomicU64,
    warnings: AtomicU64,
    freezes: AtomicU64,
    recoveries: AtomicU64,
    anrs: AtomicU64,
    dialogs: AtomicU64,
    start_time: Instant,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            checks: AtomicU64::new(0),
            skipped_checks: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            freezes: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
            anrs: AtomicU64::new(0),
            dialogs: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_check(&self) {
        self.checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_check(&self) {
        self.skipped_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_warning(&self) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_freeze(&self) {
        self.freezes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_anr(&self) {
        self.anrs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dialog(&self) {
        self.dialogs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WatchdogStats {
        WatchdogStats {
            checks: self.checks.load(Ordering::Relaxed),
            skipped_checks: self.skipped_checks.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
            freezes: self.freezes.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            anrs: self.anrs.load(Ordering::Relaxed),
            dialogs: self.dialogs.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
