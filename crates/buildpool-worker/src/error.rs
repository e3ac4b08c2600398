//! Worker errors.

use thiserror::Error;

use buildpool_scheduler::SchedulerError;

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The command could not be started at all.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stdio pipe requested at spawn time was not there.
    #[error("Missing {0} pipe")]
    MissingPipe(&'static str),

    /// Stdin was written after it was closed.
    #[error("Stdin is closed")]
    StdinClosed,

    /// The process supervisor task died without an exit code.
    #[error("Process supervisor failed: {0}")]
    Supervisor(String),

    /// Free space could not be determined.
    #[error("Disk probe failed: {0}")]
    DiskProbe(String),

    #[error("Registration failed: {0}")]
    Registration(#[from] SchedulerError),
}
