//! Job status and priority.

use serde::{Deserialize, Serialize};

/// Lifecycle of a job.
///
/// `Queued -> Assigned -> Running -> {Succeeded | Failed | Cancelled}`, with
/// `Cancelled` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in a pool queue, no worker bound.
    #[default]
    Queued,
    /// Handed to a worker that accepted the offer.
    Assigned,
    /// The worker has started the build engine.
    Running,
    /// Build engine exited with code 0.
    Succeeded,
    /// Build failed or the worker went away.
    Failed,
    /// Cancelled by the submitter.
    Cancelled,
}

impl JobStatus {
    /// Returns true if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns true if a worker slot is bound to the job.
    pub fn holds_slot(&self) -> bool {
        matches!(self, Self::Assigned | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Which pool queue a job waits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Drained before any normal job.
    Urgent,
    Normal,
}

impl Priority {
    pub fn from_urgent(urgent: bool) -> Self {
        if urgent {
            Self::Urgent
        } else {
            Self::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Assigned.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_slot_holding_states() {
        assert!(JobStatus::Assigned.holds_slot());
        assert!(JobStatus::Running.holds_slot());
        assert!(!JobStatus::Queued.holds_slot());
        assert!(!JobStatus::Failed.holds_slot());
    }
}
