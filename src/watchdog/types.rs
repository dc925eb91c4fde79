//! Identity and severity types shared by the watchdog components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one running application instance (container)
pub type InstanceId = i32;

/// Role of a monitored thread inside an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadRole {
    /// UI thread (layout, rendering, input dispatch)
    Ui,
    /// Script engine thread
    Script,
}

impl ThreadRole {
    pub const ALL: [ThreadRole; 2] = [ThreadRole::Ui, ThreadRole::Script];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadRole::Ui => "ui",
            ThreadRole::Script => "script",
        }
    }
}

impl fmt::Display for ThreadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escalating confidence that a monitored thread is stuck
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Heartbeat observed on the last check
    #[default]
    Normal,
    /// One heartbeat missed
    Warning,
    /// Two or more heartbeats missed
    Freeze,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Normal => write!(f, "normal"),
            Severity::Warning => write!(f, "warning"),
            Severity::Freeze => write!(f, "freeze"),
        }
    }
}

/// The (instance, role) pair one watcher is responsible for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchTarget {
    pub instance: InstanceId,
    pub role: ThreadRole,
}

impl WatchTarget {
    pub fn new(instance: InstanceId, role: ThreadRole) -> Self {
        Self { instance, role }
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance {} {} thread", self.instance, self.role)
    }
}
