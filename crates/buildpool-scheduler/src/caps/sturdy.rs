//! Capability files.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Which service a sturdy reference grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Submission,
    Admin,
    Registration,
}

/// A persistent, file-resolvable reference to a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SturdyRef {
    /// Base URL of the scheduler that issued it.
    pub url: String,
    pub service: Service,
    /// Pool bound by a registration reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    pub token: String,
}

impl SturdyRef {
    /// Write the reference as JSON, readable by the owner only.
    pub fn save(&self, path: &Path) -> Result<(), SchedulerError> {
        let body = serde_json::to_vec_pretty(self)?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options
            .open(path)
            .map_err(|e| SchedulerError::io(path, e))?;
        file.write_all(&body)
            .map_err(|e| SchedulerError::io(path, e))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SchedulerError> {
        let body = std::fs::read(path).map_err(|e| SchedulerError::io(path, e))?;
        Ok(serde_json::from_slice(&body)?)
    }
}
