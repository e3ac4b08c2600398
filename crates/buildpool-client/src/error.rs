//! Error types for the client.

use reqwest::StatusCode;
use thiserror::Error;

use buildpool_scheduler::SchedulerError;

/// Errors that can occur when talking to a buildpool daemon.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The capability file could not be used.
    #[error("capability file: {0}")]
    CapFile(#[from] SchedulerError),

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The daemon answered with an error.
    #[error("{message} (HTTP {status})")]
    Api {
        status: StatusCode,
        message: String,
        /// Valid names when a pool or worker was not found.
        candidates: Vec<String>,
    },

    /// The daemon's answer could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    /// True when the request itself was wrong, as opposed to the daemon or
    /// the network failing.
    pub fn is_user_error(&self) -> bool {
        match self {
            ClientError::Api { status, .. } => status.is_client_error(),
            ClientError::CapFile(_) => true,
            _ => false,
        }
    }

    /// Candidate names carried by a not-found answer.
    pub fn candidates(&self) -> &[String] {
        match self {
            ClientError::Api { candidates, .. } => candidates,
            _ => &[],
        }
    }
}
