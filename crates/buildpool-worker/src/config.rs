//! Worker configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use buildpool_core::WorkerInfo;

/// How the build engine is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable, looked up on PATH if not absolute.
    pub program: String,

    /// Arguments placed before the subcommand, e.g. `["--host", "unix:///run/docker.sock"]`.
    pub args: Vec<String>,

    /// Directory the build context is assembled in; commands run here.
    pub context_dir: PathBuf,

    /// Extra environment for every engine invocation.
    pub env: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
            args: Vec::new(),
            context_dir: PathBuf::from("."),
            env: BTreeMap::new(),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker name, unique within its pool.
    pub name: String,

    /// Maximum concurrent jobs.
    pub capacity: u32,

    /// Repositories this worker may push to.
    pub allow_push: Vec<String>,

    /// Free-space percentage below which `prune_command` runs.
    pub prune_threshold: Option<f64>,

    /// Pool registration capability file.
    pub registration_cap: PathBuf,

    pub engine: EngineConfig,

    /// Cache cleanup command, run when disk space runs low.
    pub prune_command: Vec<String>,

    /// Self-update command. Self-update is refused when empty.
    pub update_command: Vec<String>,

    /// Seconds between free-space checks.
    pub disk_check_interval_secs: u64,

    /// Filesystem whose free space is watched.
    pub disk_path: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            capacity: 1,
            allow_push: Vec::new(),
            prune_threshold: None,
            registration_cap: PathBuf::new(),
            engine: EngineConfig::default(),
            prune_command: vec![
                "docker".to_string(),
                "system".to_string(),
                "prune".to_string(),
                "--force".to_string(),
            ],
            update_command: Vec::new(),
            disk_check_interval_secs: 60,
            disk_path: PathBuf::from("/"),
        }
    }
}

impl WorkerConfig {
    /// What the worker announces when it registers.
    pub fn worker_info(&self) -> WorkerInfo {
        let mut info = WorkerInfo::new(self.name.clone(), self.capacity);
        for repo in &self.allow_push {
            info = info.with_allow_push(repo.clone());
        }
        if let Some(threshold) = self.prune_threshold {
            info = info.with_prune_threshold(threshold);
        }
        info
    }
}
