//! Thread Watchdog - liveness monitoring for application threads
//!
//! This crate detects when the UI or script thread of a hosted application
//! instance stops processing tasks:
//! - Heartbeat tasks posted to each watched thread on a severity-dependent cadence
//! - Escalation from warning to freeze, with periodic freeze re-reports
//! - "Application not responding" reports for input events left unhandled
//! - Optional signal-driven garbage collection requests
//! - Structured logging and JSON configuration

pub mod core;
pub mod logging;
pub mod watchdog;

// Re-export commonly used items
pub use core::config::WatchdogConfig;
pub use core::error::{ConfigError, Result, SchedulerError, WatchdogError};
pub use logging::{LoggingConfig, LoggingSystem};
pub use watchdog::{
    DiagnosticEvent, DiagnosticsSink, InstanceId, Severity, TaskScheduler, ThreadRole,
    ThreadScheduler, WatchDog, WatchDogBuilder, WatchTarget,
};
