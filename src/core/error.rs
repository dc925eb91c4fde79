//! Error types for the watchdog
//!
//! Errors only surface from construction paths (starting the monitor,
//! loading configuration, initializing logging). The runtime operations
//! (`register`, `unregister`, `buried_bomb`, `defusing_bomb`) absorb every
//! failure into a log line instead.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for watchdog operations
pub type Result<T> = std::result::Result<T, WatchdogError>;

/// Main error type for the watchdog
#[derive(Error, Debug)]
pub enum WatchdogError {
    #[error("Failed to spawn monitor thread: {0}")]
    MonitorSpawn(String),

    #[error("Monitor thread is not running")]
    MonitorStopped,

    #[error("Stack trace unavailable: {0}")]
    StackTrace(String),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Signal listener error: {0}")]
    Signal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a task scheduler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler has been dropped")]
    Gone,

    #[error("Thread for role {role} is not running")]
    ThreadStopped { role: String },

    #[error("Failed to spawn thread {name}: {reason}")]
    SpawnFailed { name: String, reason: String },

    #[error("Synchronous task did not complete")]
    SyncTaskLost,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
