//! Watchdog Module
//!
//! This module detects unresponsive application threads. Each registered
//! instance gets a watcher for its UI thread and, unless both roles share a
//! thread, one for its script thread. A dedicated monitor thread posts
//! heartbeat tasks to the watched threads, escalates missed heartbeats from
//! warning to freeze, and reports input events that stay unanswered as ANRs.

pub mod diagnostics;
pub mod gc;
pub mod heartbeat;
mod monitor;
pub mod pending;
mod registry;
pub mod scheduler;
pub mod stats;
pub mod supervisor;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod tests;

pub use diagnostics::{
    AnrReport, ChannelSink, DiagnosticEvent, DiagnosticsSink, NoStackInspector, StackInspector,
    TracingSink,
};
pub use gc::{platform_gc_trigger, GarbageCollector, GcTrigger, NoopGcTrigger};
#[cfg(all(unix, feature = "gc-signal"))]
pub use gc::SignalGcTrigger;
pub use heartbeat::{HeartbeatCounter, COUNTER_RESET_THRESHOLD};
pub use pending::PendingEventQueue;
pub use registry::WatcherHandle;
pub use scheduler::{Task, TaskScheduler, ThreadScheduler};
pub use stats::WatchdogStats;
pub use supervisor::{WatchDog, WatchDogBuilder};
pub use types::{InstanceId, Severity, ThreadRole, WatchTarget};
pub use watcher::{CheckAction, CheckOutcome, ThreadWatcher, WatcherSnapshot};
