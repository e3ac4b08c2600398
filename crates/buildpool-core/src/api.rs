//! Request and response bodies of the HTTP surface.
//!
//! Shared by the scheduler's router and the client so both sides agree on
//! field names.

use serde::{Deserialize, Serialize};

use crate::{CapId, JobError, JobOutcome, JobStatus, WorkerSummary};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub ticket: CapId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketJobResponse {
    pub job: CapId,
}

/// One chunk of a job log. An empty `data` with `next == start` means the
/// job is finished and everything has been delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogChunk {
    /// Base64 (standard alphabet) encoded bytes.
    pub data: String,
    pub next: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    pub worker: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultResponse {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl JobResultResponse {
    pub fn new(status: JobStatus, outcome: JobOutcome) -> Self {
        match outcome {
            Ok(output) => Self {
                status,
                output: Some(output),
                error: None,
            },
            Err(error) => Self {
                status,
                output: None,
                error: Some(error),
            },
        }
    }

    /// Turn the wire form back into a result value.
    pub fn into_outcome(self) -> JobOutcome {
        match (self.output, self.error) {
            (_, Some(error)) => Err(error),
            (Some(output), None) => Ok(output),
            (None, None) => Ok(String::new()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolsResponse {
    pub pools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersResponse {
    pub workers: Vec<WorkerSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfUpdateResponse {
    /// True when the worker will update once its running jobs drain.
    pub scheduled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnassignableResponse {
    pub jobs: Vec<String>,
}

/// Error body. `candidates` is filled for unknown pool/worker lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_response_round_trips_outcome() {
        let ok = JobResultResponse::new(JobStatus::Succeeded, Ok("sha256:1".into()));
        assert_eq!(ok.into_outcome(), Ok("sha256:1".to_string()));

        let failed = JobResultResponse::new(JobStatus::Failed, Err(JobError::WorkerDisconnected));
        let json = serde_json::to_string(&failed).unwrap();
        assert!(!json.contains("output"));
        let back: JobResultResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.into_outcome(), Err(JobError::WorkerDisconnected));
    }
}
