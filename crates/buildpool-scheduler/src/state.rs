//! Shared application state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::caps::{CapRegistry, Capability, Service};
use crate::config::Config;
use crate::error::SchedulerError;
use crate::scheduler::Scheduler;

/// Everything the HTTP surface and the daemon share.
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub caps: CapRegistry,
    pub public_url: String,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(config: &Config) -> Arc<Self> {
        Arc::new(Self {
            scheduler: Scheduler::new(config),
            caps: CapRegistry::new(),
            public_url: config.public_url.clone(),
            started_at: Utc::now(),
        })
    }

    /// Write `submission.cap`, `admin.cap` and one `pool-<name>.cap` per
    /// pool into `dir`. Returns the paths written.
    pub async fn write_capability_files(&self, dir: &Path) -> Result<Vec<PathBuf>, SchedulerError> {
        std::fs::create_dir_all(dir).map_err(|e| SchedulerError::io(dir, e))?;

        let mut written = Vec::new();

        let path = dir.join("submission.cap");
        self.caps
            .issue_file(
                &path,
                &self.public_url,
                Service::Submission,
                None,
                Capability::Submission(self.scheduler.submission()),
            )
            .await?;
        written.push(path);

        let path = dir.join("admin.cap");
        self.caps
            .issue_file(
                &path,
                &self.public_url,
                Service::Admin,
                None,
                Capability::Admin(self.scheduler.clone()),
            )
            .await?;
        written.push(path);

        for pool in self.scheduler.pools() {
            let path = registration_cap_path(dir, pool.name());
            self.caps
                .issue_file(
                    &path,
                    &self.public_url,
                    Service::Registration,
                    Some(pool.name().to_string()),
                    Capability::Registration(pool.clone()),
                )
                .await?;
            written.push(path);
        }

        info!(dir = %dir.display(), count = written.len(), "Capability files written");
        Ok(written)
    }
}

/// Where the registration capability for `pool` lives inside `dir`.
pub fn registration_cap_path(dir: &Path, pool: &str) -> PathBuf {
    dir.join(format!("pool-{pool}.cap"))
}
