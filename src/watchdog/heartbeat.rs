//! Heartbeat Counter Module
//!
//! Each check cycle advances the `expected` counter and hands the new value
//! (a ticket) to a task posted on the monitored thread. When that task runs
//! it acknowledges the ticket, raising `observed`. The thread is alive when
//! the two counters agree on the following check.

/// Counter value at which both counters snap back to zero
pub const COUNTER_RESET_THRESHOLD: u64 = u64::MAX - 1;

/// Loop/tag counter pair of one watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatCounter {
    expected: u64,
    observed: u64,
    reset_threshold: u64,
}

impl HeartbeatCounter {
    pub fn new() -> Self {
        Self::with_reset_threshold(COUNTER_RESET_THRESHOLD)
    }

    /// Create a counter that resets at a custom threshold
    pub fn with_reset_threshold(reset_threshold: u64) -> Self {
        Self {
            expected: 0,
            observed: 0,
            reset_threshold: reset_threshold.max(1),
        }
    }

    /// Number of heartbeat tasks posted since the last reset
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Highest ticket acknowledged by the monitored thread
    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Whether every posted heartbeat has been acknowledged
    pub fn is_alive(&self) -> bool {
        self.observed == self.expected
    }

    /// Advance the expected counter and return the ticket to post
    pub fn advance(&mut self) -> u64 {
        if self.expected >= self.reset_threshold {
            tracing::trace!("Heartbeat counters reached {}, resetting", self.expected);
            self.expected = 0;
            self.observed = 0;
        }
        self.expected += 1;
        self.expected
    }

    /// Record that the monitored thread ran the task carrying `ticket`.
    ///
    /// Tickets that are stale (already covered) or from before a reset are
    /// ignored. Returns whether `observed` moved.
    pub fn acknowledge(&mut self, ticket: u64) -> bool {
        if ticket > self.expected || ticket <= self.observed {
            return false;
        }
        self.observed = ticket;
        true
    }

    /// Withdraw a ticket whose task could not be posted
    pub fn withdraw(&mut self, ticket: u64) {
        if ticket == self.expected && self.expected > self.observed {
            self.expected -= 1;
        }
    }

    /// Treat everything posted so far as acknowledged
    pub fn resync(&mut self) {
        self.observed = self.expected;
    }
}

impl Default for HeartbeatCounter {
    fn default() -> Self {
        Self::new()
    }
}
