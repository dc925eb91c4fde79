//! Thread Watcher Module
//!
//! A [`ThreadWatcher`] follows one (instance, role) pair through the
//! Normal → Warning → Freeze escalation. The state machine itself is pure:
//! [`ThreadWatcher::evaluate`] updates the watcher's state under its lock and
//! returns a [`CheckOutcome`] describing what the caller has to do (post the
//! next heartbeat, emit diagnostics). Nothing cross-thread happens while the
//! lock is held.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::heartbeat::HeartbeatCounter;
use super::pending::PendingEventQueue;
use super::scheduler::TaskScheduler;
use super::types::{Severity, WatchTarget};
use crate::core::config::WatchdogConfig;

/// Side effect requested by one check cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckAction {
    /// First missed heartbeat
    Warning,
    /// Freeze detected; `repeat` is 0 on entry and counts re-reports after
    Freeze { repeat: u32 },
    /// Thread observed alive again after `from`
    Recovered { from: Severity },
    /// Oldest pending input exceeded the ANR threshold
    Anr {
        pending_for: Duration,
        pending_events: usize,
        show_dialog: bool,
    },
}

/// Result of one check cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Severity after this cycle
    pub severity: Severity,
    /// Delay before the next check
    pub next_check: Duration,
    /// Heartbeat ticket to post onto the monitored thread
    pub ticket: Option<u64>,
    pub actions: Vec<CheckAction>,
}

/// Read-only view of a watcher's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherSnapshot {
    pub target: WatchTarget,
    pub severity: Severity,
    pub expected_heartbeats: u64,
    pub observed_heartbeats: u64,
    pub consecutive_freeze_cycles: u32,
    pub pending_inputs: usize,
    pub dialog_suppressed: bool,
    pub dialog_suppressed_cycles: u32,
    pub suspended: bool,
}

#[derive(Debug, Default)]
struct WatcherState {
    heartbeat: HeartbeatCounter,
    severity: Severity,
    consecutive_freeze_cycles: u32,
    pending: PendingEventQueue,
    dialog_suppressed: bool,
    dialog_suppressed_cycles: u32,
    suspended: bool,
}

impl WatcherState {
    fn reset_to_normal(&mut self) {
        self.severity = Severity::Normal;
        self.consecutive_freeze_cycles = 0;
        self.dialog_suppressed = false;
        self.dialog_suppressed_cycles = 0;
    }

    fn tick_dialog_cooldown(&mut self, cooldown: u32) {
        if !self.dialog_suppressed {
            return;
        }
        self.dialog_suppressed_cycles += 1;
        if self.dialog_suppressed_cycles >= cooldown {
            self.dialog_suppressed = false;
            self.dialog_suppressed_cycles = 0;
        }
    }
}

/// Liveness monitor for one thread of one instance
pub struct ThreadWatcher {
    target: WatchTarget,
    generation: u64,
    config: Arc<WatchdogConfig>,
    scheduler: Weak<dyn TaskScheduler>,
    state: RwLock<WatcherState>,
}

impl ThreadWatcher {
    pub fn new(
        target: WatchTarget,
        generation: u64,
        config: Arc<WatchdogConfig>,
        scheduler: Weak<dyn TaskScheduler>,
    ) -> Self {
        Self {
            target,
            generation,
            config,
            scheduler,
            state: RwLock::new(WatcherState::default()),
        }
    }

    pub fn target(&self) -> WatchTarget {
        self.target
    }

    /// Registration generation, distinguishes re-registrations of one id
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The host scheduler, if it is still alive
    pub fn scheduler(&self) -> Option<Arc<dyn TaskScheduler>> {
        self.scheduler.upgrade()
    }

    pub fn severity(&self) -> Severity {
        self.state.read().severity
    }

    /// Check period that applies at `severity`
    pub fn period_for(&self, severity: Severity) -> Duration {
        match severity {
            Severity::Normal => self.config.normal_check_period(),
            Severity::Warning => self.config.warning_check_period(),
            Severity::Freeze => self.config.freeze_check_period(),
        }
    }

    /// Period for the current severity
    pub fn current_period(&self) -> Duration {
        self.period_for(self.severity())
    }

    /// Run one check cycle at `now`
    pub fn evaluate(&self, now: Instant) -> CheckOutcome {
        let mut state = self.state.write();
        let mut actions = Vec::new();

        if state.suspended {
            state.heartbeat.resync();
            state.reset_to_normal();
            return CheckOutcome {
                severity: Severity::Normal,
                next_check: self.period_for(Severity::Normal),
                ticket: None,
                actions,
            };
        }

        state.tick_dialog_cooldown(self.config.dialog_suppress_cycles);

        if state.heartbeat.is_alive() {
            if state.severity != Severity::Normal {
                actions.push(CheckAction::Recovered {
                    from: state.severity,
                });
            }
            state.reset_to_normal();
        } else {
            match state.severity {
                Severity::Normal => {
                    state.severity = Severity::Warning;
                    actions.push(CheckAction::Warning);
                }
                Severity::Warning => {
                    state.severity = Severity::Freeze;
                    state.consecutive_freeze_cycles = 0;
                    actions.push(CheckAction::Freeze { repeat: 0 });
                    self.evaluate_pending(&mut state, now, &mut actions);
                }
                Severity::Freeze => {
                    state.consecutive_freeze_cycles =
                        state.consecutive_freeze_cycles.saturating_add(1);
                    let repeat = state.consecutive_freeze_cycles;
                    if repeat % self.config.freeze_report_interval.max(1) == 0 {
                        actions.push(CheckAction::Freeze { repeat });
                    }
                    self.evaluate_pending(&mut state, now, &mut actions);
                }
            }
        }

        let ticket = state.heartbeat.advance();
        let severity = state.severity;

        CheckOutcome {
            severity,
            next_check: self.period_for(severity),
            ticket: Some(ticket),
            actions,
        }
    }

    fn evaluate_pending(&self, state: &mut WatcherState, now: Instant, actions: &mut Vec<CheckAction>) {
        let Some(pending_for) = state.pending.oldest_age(now) else {
            return;
        };
        if pending_for <= self.config.anr_input_freeze_time() {
            return;
        }

        let show_dialog = !state.dialog_suppressed;
        if show_dialog {
            state.dialog_suppressed = true;
            state.dialog_suppressed_cycles = 0;
        }
        let pending_events = state.pending.clear();

        actions.push(CheckAction::Anr {
            pending_for,
            pending_events,
            show_dialog,
        });
    }

    /// The monitored thread ran the heartbeat task carrying `ticket`
    pub fn acknowledge(&self, ticket: u64) -> bool {
        self.state.write().heartbeat.acknowledge(ticket)
    }

    /// Take back a ticket whose task never reached the monitored thread
    pub fn withdraw(&self, ticket: u64) {
        self.state.write().heartbeat.withdraw(ticket);
    }

    /// An input event was dispatched to the monitored thread
    pub fn bury(&self, timestamp: Instant) {
        self.state.write().pending.bury(timestamp);
    }

    /// The monitored thread finished the oldest pending input
    pub fn defuse(&self) -> Option<Instant> {
        self.state.write().pending.defuse()
    }

    /// Pause or resume escalation. Both directions restart from Normal.
    pub fn set_suspended(&self, suspended: bool) {
        let mut state = self.state.write();
        if state.suspended == suspended {
            return;
        }
        state.suspended = suspended;
        state.heartbeat.resync();
        state.reset_to_normal();
    }

    pub fn snapshot(&self) -> WatcherSnapshot {
        let state = self.state.read();
        WatcherSnapshot {
            target: self.target,
            severity: state.severity,
            expected_heartbeats: state.heartbeat.expected(),
            observed_heartbeats: state.heartbeat.observed(),
            consecutive_freeze_cycles: state.consecutive_freeze_cycles,
            pending_inputs: state.pending.len(),
            dialog_suppressed: state.dialog_suppressed,
            dialog_suppressed_cycles: state.dialog_suppressed_cycles,
            suspended: state.suspended,
        }
    }
}

impl std::fmt::Debug for ThreadWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadWatcher")
            .field("target", &self.target)
            .field("generation", &self.generation)
            .field("severity", &self.severity())
            .finish()
    }
}
