//! Configuration module for the watchdog
//!
//! Handles the tuning constants of the liveness monitor:
//! - Check periods per severity
//! - ANR input threshold and dialog cool-down
//! - Freeze report cadence
//! - Optional GC trigger signal
//!
//! Configuration is stored as JSON. Writes go to a temp file that is then
//! renamed over the target.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::ConfigError;

/// Configuration result type
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Watchdog configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Recheck period while the thread is healthy (ms)
    #[serde(default = "default_normal_period")]
    pub normal_check_period_ms: u64,

    /// Recheck period after a first missed heartbeat (ms)
    #[serde(default = "default_warning_period")]
    pub warning_check_period_ms: u64,

    /// Recheck period while frozen (ms)
    #[serde(default = "default_freeze_period")]
    pub freeze_check_period_ms: u64,

    /// Age of the oldest pending input that confirms an ANR (ms)
    #[serde(default = "default_anr_time")]
    pub anr_input_freeze_time_ms: u64,

    /// Check cycles during which no further ANR dialog is shown
    #[serde(default = "default_dialog_suppress_cycles")]
    pub dialog_suppress_cycles: u32,

    /// Re-emit the freeze report every N consecutive freeze cycles
    #[serde(default = "default_freeze_report_interval")]
    pub freeze_report_interval: u32,

    /// Signal number that requests a garbage collection (Unix only)
    #[serde(default)]
    pub gc_signal: Option<i32>,

    /// Name given to the dedicated monitor thread
    #[serde(default = "default_thread_name")]
    pub monitor_thread_name: String,
}

fn default_normal_period() -> u64 {
    3000
}

fn default_warning_period() -> u64 {
    2000
}

fn default_freeze_period() -> u64 {
    1000
}

fn default_anr_time() -> u64 {
    5000
}

fn default_dialog_suppress_cycles() -> u32 {
    20
}

fn default_freeze_report_interval() -> u32 {
    5
}

fn default_thread_name() -> String {
    "watchdog-monitor".to_string()
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            normal_check_period_ms: default_normal_period(),
            warning_check_period_ms: default_warning_period(),
            freeze_check_period_ms: default_freeze_period(),
            anr_input_freeze_time_ms: default_anr_time(),
            dialog_suppress_cycles: default_dialog_suppress_cycles(),
            freeze_report_interval: default_freeze_report_interval(),
            gc_signal: None,
            monitor_thread_name: default_thread_name(),
        }
    }
}

impl WatchdogConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set all three check periods at once
    pub fn with_periods(mut self, normal: Duration, warning: Duration, freeze: Duration) -> Self {
        self.normal_check_period_ms = duration_ms(normal);
        self.warning_check_period_ms = duration_ms(warning);
        self.freeze_check_period_ms = duration_ms(freeze);
        self
    }

    /// Set the ANR input threshold
    pub fn with_anr_input_freeze_time(mut self, time: Duration) -> Self {
        self.anr_input_freeze_time_ms = duration_ms(time);
        self
    }

    /// Set the dialog cool-down in check cycles
    pub fn with_dialog_suppress_cycles(mut self, cycles: u32) -> Self {
        self.dialog_suppress_cycles = cycles;
        self
    }

    /// Set the freeze report cadence
    pub fn with_freeze_report_interval(mut self, interval: u32) -> Self {
        self.freeze_report_interval = interval;
        self
    }

    /// Set the GC trigger signal
    pub fn with_gc_signal(mut self, signal: i32) -> Self {
        self.gc_signal = Some(signal);
        self
    }

    /// Set the monitor thread name
    pub fn with_monitor_thread_name(mut self, name: impl Into<String>) -> Self {
        self.monitor_thread_name = name.into();
        self
    }

    pub fn normal_check_period(&self) -> Duration {
        Duration::from_millis(self.normal_check_period_ms)
    }

    pub fn warning_check_period(&self) -> Duration {
        Duration::from_millis(self.warning_check_period_ms)
    }

    pub fn freeze_check_period(&self) -> Duration {
        Duration::from_millis(self.freeze_check_period_ms)
    }

    pub fn anr_input_freeze_time(&self) -> Duration {
        Duration::from_millis(self.anr_input_freeze_time_ms)
    }

    /// Check the configuration for values the monitor cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.normal_check_period_ms == 0
            || self.warning_check_period_ms == 0
            || self.freeze_check_period_ms == 0
        {
            return Err(ConfigError::Invalid(
                "check periods must be greater than zero".to_string(),
            ));
        }

        if self.warning_check_period_ms > self.normal_check_period_ms {
            return Err(ConfigError::Invalid(format!(
                "warning period ({}ms) exceeds normal period ({}ms)",
                self.warning_check_period_ms, self.normal_check_period_ms
            )));
        }

        if self.freeze_check_period_ms > self.warning_check_period_ms {
            return Err(ConfigError::Invalid(format!(
                "freeze period ({}ms) exceeds warning period ({}ms)",
                self.freeze_check_period_ms, self.warning_check_period_ms
            )));
        }

        if self.freeze_report_interval == 0 {
            return Err(ConfigError::Invalid(
                "freeze_report_interval must be at least 1".to_string(),
            ));
        }

        if self.dialog_suppress_cycles == 0 {
            return Err(ConfigError::Invalid(
                "dialog_suppress_cycles must be at least 1".to_string(),
            ));
        }

        if self.monitor_thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "monitor_thread_name must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let config: WatchdogConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, falling back to defaults if it is missing
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound(_)) => {
                tracing::debug!("No watchdog config at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Save the configuration as pretty-printed JSON
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;

        // Write to temp file first
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, &content)?;

        // Atomic rename
        std::fs::rename(&temp_path, path)?;

        tracing::debug!("Watchdog config saved to {:?}", path);
        Ok(())
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Default location of the configuration file
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("thread-watchdog")
        .join("watchdog.json")
}
