//! Supervisor lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of the supervised server.
///
/// The cycle is `Stopped → Starting → Running → Stopping → Stopped`. A child
/// that exits on its own takes the `Running → Stopped` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LifecycleState {
    #[default]
    #[serde(rename = "not running")]
    Stopped,
    #[serde(rename = "starting")]
    Starting,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "stopping")]
    Stopping,
}

impl LifecycleState {
    /// Label delivered to front ends.
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Stopped => "not running",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        }
    }

    /// Whether `next` may follow `self` as a real transition.
    ///
    /// Re-announcements (`Running` from `open`, `Stopped` from a stop with no
    /// child) are not transitions and are not covered here.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Running, Stopping)
                | (Running, Stopped)
                | (Stopping, Stopped)
        )
    }

    /// A child process exists in this state.
    pub fn has_process(self) -> bool {
        !matches!(self, LifecycleState::Stopped)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
