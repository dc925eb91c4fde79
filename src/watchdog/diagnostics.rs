//! Diagnostics Module
//!
//! Collaborators that receive the watchdog's findings:
//! - [`DiagnosticsSink`]: warning, freeze, recovery and ANR notifications
//! - [`StackInspector`]: best-effort stack capture from the script engine
//!
//! Two sinks ship with the crate. [`TracingSink`] renders every finding as a
//! structured log line; [`ChannelSink`] forwards serializable
//! [`DiagnosticEvent`]s to a receiver (telemetry upload, tests).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::types::{InstanceId, WatchTarget};
use crate::core::config::duration_ms;
use crate::core::error::Result;

/// Receiver of escalation events. All calls are fire-and-forget.
pub trait DiagnosticsSink: Send + Sync {
    fn report_warning(&self, target: WatchTarget);

    fn report_freeze(&self, target: WatchTarget, message: &str);

    fn report_recovered(&self, target: WatchTarget);

    fn report_anr(&self, report: &AnrReport);

    /// Present the platform "app not responding" dialog
    fn show_anr_dialog(&self, target: WatchTarget);
}

/// Source of engine stack traces for freeze and ANR reports
pub trait StackInspector: Send + Sync {
    fn stack_trace(&self, instance: InstanceId) -> Result<String>;
}

/// Inspector used when the host has no engine to ask
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStackInspector;

impl StackInspector for NoStackInspector {
    fn stack_trace(&self, _instance: InstanceId) -> Result<String> {
        Ok(String::new())
    }
}

/// A confirmed "application not responding" finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnrReport {
    /// Unique report ID (time-ordered)
    pub id: Uuid,
    pub target: WatchTarget,
    /// Debug rendering of the monitored thread's id, if the scheduler knows it
    pub thread_id: Option<String>,
    /// Age of the oldest unacknowledged input
    pub pending_for_ms: u64,
    /// Number of inputs dropped from the queue by this report
    pub pending_events: usize,
    /// Engine stack snapshot, empty when unavailable
    pub stack_trace: String,
    /// Whether the dialog was shown for this report
    pub dialog_shown: bool,
    pub reported_at: DateTime<Utc>,
}

impl AnrReport {
    pub fn new(
        target: WatchTarget,
        thread_id: Option<String>,
        pending_for: Duration,
        pending_events: usize,
        stack_trace: String,
        dialog_shown: bool,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            target,
            thread_id,
            pending_for_ms: duration_ms(pending_for),
            pending_events,
            stack_trace,
            dialog_shown,
            reported_at: Utc::now(),
        }
    }
}

/// Serializable form of every sink call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    Warning {
        target: WatchTarget,
        at: DateTime<Utc>,
    },
    Freeze {
        target: WatchTarget,
        message: String,
        at: DateTime<Utc>,
    },
    Recovered {
        target: WatchTarget,
        at: DateTime<Utc>,
    },
    Anr(AnrReport),
    Dialog {
        target: WatchTarget,
        at: DateTime<Utc>,
    },
}

impl DiagnosticEvent {
    pub fn target(&self) -> WatchTarget {
        match self {
            DiagnosticEvent::Warning { target, .. }
            | DiagnosticEvent::Freeze { target, .. }
            | DiagnosticEvent::Recovered { target, .. }
            | DiagnosticEvent::Dialog { target, .. } => *target,
            DiagnosticEvent::Anr(report) => report.target,
        }
    }

    /// Render as a single-line JSON document
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Sink that writes every finding to the `tracing` subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn report_warning(&self, target: WatchTarget) {
        tracing::warn!(
            instance = target.instance,
            role = %target.role,
            "{} missed a heartbeat",
            target
        );
    }

    fn report_freeze(&self, target: WatchTarget, message: &str) {
        tracing::error!(
            instance = target.instance,
            role = %target.role,
            "{} is frozen: {}",
            target,
            message
        );
    }

    fn report_recovered(&self, target: WatchTarget) {
        tracing::info!(
            instance = target.instance,
            role = %target.role,
            "{} recovered",
            target
        );
    }

    fn report_anr(&self, report: &AnrReport) {
        tracing::error!(
            instance = report.target.instance,
            role = %report.target.role,
            report_id = %report.id,
            thread = report.thread_id.as_deref().unwrap_or("unknown"),
            pending_for_ms = report.pending_for_ms,
            pending_events = report.pending_events,
            "Application not responding: input pending for {}ms",
            report.pending_for_ms
        );
        if !report.stack_trace.is_empty() {
            tracing::error!(report_id = %report.id, "Stack trace:\n{}", report.stack_trace);
        }
    }

    fn show_anr_dialog(&self, target: WatchTarget) {
        tracing::warn!(
            instance = target.instance,
            "ANR dialog requested for instance {}",
            target.instance
        );
    }
}

/// Sink that forwards [`DiagnosticEvent`]s over a channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<DiagnosticEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DiagnosticEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn forward(&self, event: DiagnosticEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Diagnostic event receiver dropped");
        }
    }
}

impl DiagnosticsSink for ChannelSink {
    fn report_warning(&self, target: WatchTarget) {
        self.forward(DiagnosticEvent::Warning {
            target,
            at: Utc::now(),
        });
    }

    fn report_freeze(&self, target: WatchTarget, message: &str) {
        self.forward(DiagnosticEvent::Freeze {
            target,
            message: message.to_string(),
            at: Utc::now(),
        });
    }

    fn report_recovered(&self, target: WatchTarget) {
        self.forward(DiagnosticEvent::Recovered {
            target,
            at: Utc::now(),
        });
    }

    fn report_anr(&self, report: &AnrReport) {
        self.forward(DiagnosticEvent::Anr(report.clone()));
    }

    fn show_anr_dialog(&self, target: WatchTarget) {
        self.forward(DiagnosticEvent::Dialog {
            target,
            at: Utc::now(),
        });
    }
}
