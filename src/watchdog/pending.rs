//! Pending input tracking ("bombs").
//!
//! An input event dispatched to a monitored thread is buried here with its
//! dispatch time and defused when the thread finishes handling it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// FIFO of dispatch timestamps, oldest first
#[derive(Debug, Clone, Default)]
pub struct PendingEventQueue {
    timestamps: VecDeque<Instant>,
}

impl PendingEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an input event dispatched at `timestamp`
    pub fn bury(&mut self, timestamp: Instant) {
        self.timestamps.push_back(timestamp);
    }

    /// Remove the oldest pending event. Empty queue is a no-op.
    pub fn defuse(&mut self) -> Option<Instant> {
        self.timestamps.pop_front()
    }

    pub fn oldest(&self) -> Option<Instant> {
        self.timestamps.front().copied()
    }

    /// How long the oldest event has been waiting at `now`
    pub fn oldest_age(&self, now: Instant) -> Option<Duration> {
        self.oldest().map(|oldest| now.saturating_duration_since(oldest))
    }

    /// Drop every pending event, returning how many there were
    pub fn clear(&mut self) -> usize {
        let count = self.timestamps.len();
        self.timestamps.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
