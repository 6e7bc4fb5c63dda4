//! Execution flags, signals and kill scopes.

use serde::{Deserialize, Serialize};

/// Execution options passed to the spawn capability.
///
/// `sync` and `show_console` are advisory: a spawner may honour them where
/// the platform supports it (console visibility only means something on
/// Windows). `group_leader` makes the child the leader of its own process
/// group, which is what makes [`KillScope::Children`] effective on Unix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFlags {
    /// Wait for the process to finish at spawn time instead of running it
    /// in the background.
    pub sync: bool,
    /// Show a console window for the child where the platform has one.
    pub show_console: bool,
    /// Spawn the child as its own process group leader.
    pub group_leader: bool,
}

impl JobFlags {
    /// Default flags: asynchronous, hidden console, no group leadership.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the child as its own process group leader.
    #[must_use]
    pub fn group_leader(mut self, value: bool) -> Self {
        self.group_leader = value;
        self
    }

    /// Show a console window for the child.
    #[must_use]
    pub fn show_console(mut self, value: bool) -> Self {
        self.show_console = value;
        self
    }

    /// Run the spawn synchronously.
    #[must_use]
    pub fn sync(mut self, value: bool) -> Self {
        self.sync = value;
        self
    }
}

/// Portable subset of termination signals.
///
/// These are the signals that behave sensibly on every supported platform;
/// on non-Unix targets anything other than a plain kill degrades to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// Interrupt (Ctrl-C / SIGINT).
    Interrupt,
    /// Polite request to shut down (SIGTERM).
    Terminate,
    /// Forced, uncatchable kill (SIGKILL).
    Kill,
}

/// Whether a kill affects only the process or also its children.
///
/// [`KillScope::Children`] signals the whole process group and therefore
/// only reaches children if the process was spawned with
/// [`JobFlags::group_leader`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KillScope {
    /// Signal only the spawned process.
    #[default]
    Process,
    /// Signal the spawned process and its children.
    Children,
}

/// Why a kill request failed.
#[derive(thiserror::Error, Debug)]
pub enum TerminateError {
    /// The process no longer exists (already exited and reaped).
    #[error("No such process")]
    NoProcess,
    /// Insufficient permission to signal the process.
    #[error("Access denied signalling process")]
    AccessDenied,
    /// The signal is not valid for the target.
    #[error("Bad signal")]
    BadSignal,
    /// Any other failure.
    #[error("Failed to signal process: {0}")]
    Failed(String),
}
