//! Watchdog Core Module
//!
//! This module contains the shared building blocks:
//! - Configuration management
//! - Error types

pub mod config;
pub mod error;

// Re-export commonly used items
pub use config::{default_config_path, ConfigResult, WatchdogConfig};
pub use error::{ConfigError, Result, SchedulerError, WatchdogError};
