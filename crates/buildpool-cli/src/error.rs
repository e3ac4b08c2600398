//! CLI errors and their exit codes.

use std::path::PathBuf;

use thiserror::Error;

use buildpool_client::ClientError;
use buildpool_core::{CoreError, JobError};

/// Exit code for mistakes the user can fix.
pub const EXIT_USER_ERROR: i32 = 2;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Failed to read '{}': {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Request(#[from] CoreError),

    #[error(transparent)]
    Client(#[from] ClientError),

    /// The build ran and did not succeed.
    #[error("{0}")]
    Job(JobError),

    #[error("Worker '{0}' has no update command configured")]
    UpdateRefused(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::ReadFile { .. } | CliError::Request(_) | CliError::UpdateRefused(_) => {
                EXIT_USER_ERROR
            }
            CliError::Client(e) if e.is_user_error() => EXIT_USER_ERROR,
            CliError::Client(_) | CliError::Job(_) => 1,
        }
    }

    /// Valid names to suggest, when a pool or worker did not match.
    pub fn candidates(&self) -> &[String] {
        match self {
            CliError::Client(e) => e.candidates(),
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            CliError::Request(CoreError::InvalidRequest("x".into())).exit_code(),
            EXIT_USER_ERROR
        );
        assert_eq!(CliError::Job(JobError::Cancelled).exit_code(), 1);
        assert_eq!(CliError::UpdateRefused("w1".into()).exit_code(), EXIT_USER_ERROR);
        assert!(CliError::Job(JobError::WorkerDisconnected).candidates().is_empty());
    }
}
