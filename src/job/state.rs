//! Job lifecycle states.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`Job`](crate::job::Job).
///
/// The lifecycle only moves forward: `Idle` → `Running` → `Terminated`.
/// `Terminated` is terminal; a finished job is not restartable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Created but not started.
    #[default]
    Idle,
    /// Process spawned and being supervised.
    Running,
    /// Process exited or was terminated. Terminal.
    Terminated,
}

impl JobState {
    /// Whether the job can still be started.
    #[must_use]
    pub fn can_start(self) -> bool {
        self == Self::Idle
    }

    /// Whether the lifecycle has ended.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Terminated
    }
}
