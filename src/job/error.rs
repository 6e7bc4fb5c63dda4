//! Job error types.

use crate::process::{SpawnError, TerminateError};

/// Errors that can occur while managing a job.
#[derive(thiserror::Error, Debug)]
pub enum JobError {
    /// `start()` was called while the process is running.
    #[error("Job is already running")]
    AlreadyRunning,

    /// `start()` was called on a terminated job; jobs are single-use.
    #[error("Job has terminated and cannot be restarted")]
    Finished,

    /// A property that is frozen while the process runs was assigned.
    #[error("Cannot set `{property}` while the job is running")]
    MutableWhileRunning {
        /// Name of the rejected property.
        property: &'static str,
    },

    /// The process could not be created.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// A kill request could not be delivered.
    #[error(transparent)]
    Terminate(#[from] TerminateError),
}
