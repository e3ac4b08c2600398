//! Scheduler configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What happens to a job whose worker disconnects mid-build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Fail the job.
    #[default]
    Never,
    /// Re-queue jobs the submitter marked idempotent, at most once.
    Idempotent,
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server bind address.
    pub listen_addr: String,

    /// Base URL written into capability files.
    pub public_url: String,

    /// Directory the capability files are written to.
    pub state_dir: PathBuf,

    /// Names of the pools to create.
    pub pools: Vec<String>,

    pub retry_policy: RetryPolicy,

    /// Bound on buffered, not yet applied reports per job.
    pub report_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9000".to_string(),
            public_url: "http://127.0.0.1:9000".to_string(),
            state_dir: PathBuf::from("./var"),
            pools: Vec::new(),
            retry_policy: RetryPolicy::Never,
            report_channel_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let cfg: Config =
            serde_json::from_str(r#"{ "pools": ["linux-x86_64"], "retry_policy": "idempotent" }"#)
                .unwrap();
        assert_eq!(cfg.pools, vec!["linux-x86_64".to_string()]);
        assert_eq!(cfg.retry_policy, RetryPolicy::Idempotent);
        assert_eq!(cfg.listen_addr, "127.0.0.1:9000");
        assert_eq!(cfg.report_channel_capacity, 64);
    }

    #[test]
    fn test_retry_policy_default_is_never() {
        assert_eq!(Config::default().retry_policy, RetryPolicy::Never);
    }
}
