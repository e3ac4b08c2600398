//! Core domain errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core domain errors for buildpool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Malformed submission. Never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Pool not found. Carries the names that do exist.
    #[error("Pool not found: {name} (known pools: {})", .candidates.join(", "))]
    PoolNotFound {
        name: String,
        candidates: Vec<String>,
    },

    /// Worker not found in a pool. Carries the names that do exist.
    #[error("Worker not found: {name} (known workers: {})", .candidates.join(", "))]
    WorkerNotFound {
        name: String,
        candidates: Vec<String>,
    },

    /// Job not found.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// A peer broke the reporting protocol (duplicate completion, data after
    /// completion). Logged and ignored by the receiving side.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
}

/// Tagged failure stored in a job's result slot.
///
/// Execution errors are ordinary values: they are captured here and handed
/// to whoever reads the result, never raised across a capability boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobError {
    /// The build engine exited with a non-zero code.
    #[error("build failed with exit code {exit_code}")]
    BuildFailed { exit_code: i32, output: String },

    /// The worker running the job went away before reporting completion.
    #[error("worker disconnected")]
    WorkerDisconnected,

    /// The submitter cancelled the job.
    #[error("job cancelled")]
    Cancelled,

    /// The worker could not run the build engine at all.
    #[error("{message}")]
    Engine { message: String },
}

/// Final value of a job: the engine's captured output or a tagged error.
pub type JobOutcome = Result<String, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_candidates() {
        let err = CoreError::WorkerNotFound {
            name: "w9".into(),
            candidates: vec!["w1".into(), "w2".into()],
        };
        assert_eq!(err.to_string(), "Worker not found: w9 (known workers: w1, w2)");
    }

    #[test]
    fn test_job_error_is_tagged_on_the_wire() {
        let err = JobError::BuildFailed {
            exit_code: 2,
            output: "boom".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "build_failed");
        assert_eq!(json["exit_code"], 2);

        let back: JobError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }
}
