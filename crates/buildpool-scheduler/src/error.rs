//! Scheduler errors.

use std::path::PathBuf;

use thiserror::Error;

use buildpool_core::CoreError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The token or id does not name a live capability.
    #[error("Unknown capability")]
    UnknownCapability,

    /// The capability exists but is not the kind this operation needs.
    #[error("Capability is not a {expected} capability")]
    WrongCapabilityKind { expected: &'static str },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed capability file: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchedulerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
