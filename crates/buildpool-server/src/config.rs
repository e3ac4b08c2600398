//! Daemon configuration file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use buildpool_scheduler::state::registration_cap_path;
use buildpool_scheduler::Config;
use buildpool_worker::WorkerConfig;

use crate::error::ServerError;

/// A worker the daemon runs in-process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalWorkerConfig {
    /// Pool to join when `registration_cap` is not set.
    pub pool: Option<String>,

    #[serde(flatten)]
    pub worker: WorkerConfig,
}

/// Everything `buildpoold` reads from its JSON config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub scheduler: Config,

    pub workers: Vec<LocalWorkerConfig>,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let text = std::fs::read_to_string(path).map_err(|source| ServerError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ServerError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply command line overrides.
    pub fn with_overrides(mut self, listen: Option<String>, state_dir: Option<PathBuf>) -> Self {
        if let Some(listen) = listen {
            self.scheduler.listen_addr = listen;
        }
        if let Some(state_dir) = state_dir {
            self.scheduler.state_dir = state_dir;
        }
        self
    }

    /// Worker configs with every registration capability path filled in.
    pub fn resolved_workers(&self) -> Result<Vec<WorkerConfig>, ServerError> {
        self.workers
            .iter()
            .map(|entry| {
                let mut worker = entry.worker.clone();
                if worker.registration_cap.as_os_str().is_empty() {
                    let pool = entry
                        .pool
                        .as_deref()
                        .ok_or_else(|| ServerError::WorkerWithoutPool(worker.name.clone()))?;
                    worker.registration_cap = registration_cap_path(&self.scheduler.state_dir, pool);
                }
                Ok(worker)
            })
            .collect()
    }
}
