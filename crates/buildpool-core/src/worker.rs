//! Worker information types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What a worker announces when it registers with a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Unique within a pool.
    pub name: String,

    /// Maximum concurrent jobs.
    pub capacity: u32,

    /// Repositories this worker is willing to push images to.
    pub allow_push: BTreeSet<String>,

    /// Free-space percentage below which the worker prunes its cache.
    pub prune_threshold: Option<f64>,

    /// Worker binary version.
    pub version: String,
}

impl WorkerInfo {
    /// Create a new WorkerInfo.
    pub fn new(name: impl Into<String>, capacity: u32) -> Self {
        Self {
            name: name.into(),
            capacity,
            allow_push: BTreeSet::new(),
            prune_threshold: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Builder method to allow pushing to a repository.
    pub fn with_allow_push(mut self, repository: impl Into<String>) -> Self {
        self.allow_push.insert(repository.into());
        self
    }

    /// Builder method to set the prune threshold.
    pub fn with_prune_threshold(mut self, percent: f64) -> Self {
        self.prune_threshold = Some(percent);
        self
    }

    /// Check if this worker may run a job that pushes to `repository`.
    pub fn can_push(&self, repository: &str) -> bool {
        self.allow_push.contains(repository)
    }
}

/// Read-only view of a registered worker for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub name: String,
    pub active: bool,
    pub running: u32,
    pub capacity: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_push() {
        let info = WorkerInfo::new("w1", 2).with_allow_push("team/app");
        assert!(info.can_push("team/app"));
        assert!(!info.can_push("team/other"));
    }
}
