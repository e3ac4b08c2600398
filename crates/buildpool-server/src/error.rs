//! Daemon errors.

use std::path::PathBuf;

use thiserror::Error;

use buildpool_scheduler::SchedulerError;
use buildpool_worker::ExecutorError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to read config '{}': {source}", .path.display())]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config '{}': {source}", .path.display())]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Worker '{0}' names neither a pool nor a registration_cap")]
    WorkerWithoutPool(String),

    #[error("Worker '{name}' failed to join its pool: {source}")]
    Worker {
        name: String,
        #[source]
        source: ExecutorError,
    },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),
}
