//! Disk hygiene: prune the engine's cache when free space runs low.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ExecutorError;
use crate::process::{run_captured, CommandSpec};

/// Edge detector for low disk space.
///
/// Fires once when free space drops below the threshold and stays quiet
/// until it has risen back above it.
#[derive(Debug, Clone)]
pub struct DiskMonitor {
    threshold: f64,
    armed: bool,
}

impl DiskMonitor {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            armed: true,
        }
    }

    /// Feed one reading. Returns true when a prune should run.
    pub fn observe(&mut self, free_percent: f64) -> bool {
        if free_percent < self.threshold {
            if self.armed {
                self.armed = false;
                return true;
            }
            false
        } else {
            if free_percent > self.threshold {
                self.armed = true;
            }
            false
        }
    }
}

/// Source of free-space readings.
#[async_trait]
pub trait FreeSpaceProbe: Send + Sync {
    /// Free space on the watched filesystem, in percent.
    async fn free_percent(&self) -> Result<f64, ExecutorError>;
}

/// Reads free space from `df -P`.
#[derive(Debug, Clone)]
pub struct DfProbe {
    path: PathBuf,
}

impl DfProbe {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl FreeSpaceProbe for DfProbe {
    async fn free_percent(&self) -> Result<f64, ExecutorError> {
        let spec = CommandSpec::new("df")
            .arg("-P")
            .arg(self.path.display().to_string());
        let (code, output) = run_captured(&spec, CancellationToken::new()).await?;
        if code != 0 {
            return Err(ExecutorError::DiskProbe(format!(
                "df exited with {code}: {}",
                String::from_utf8_lossy(&output.stderr_bytes()).trim()
            )));
        }
        parse_df_output(&String::from_utf8_lossy(&output.stdout_bytes()))
    }
}

/// Free percentage from POSIX `df -P` output: 100 minus the capacity column
/// of the first data row.
pub fn parse_df_output(text: &str) -> Result<f64, ExecutorError> {
    let row = text
        .lines()
        .skip(1)
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| ExecutorError::DiskProbe("df printed no data row".into()))?;

    let used = row
        .split_whitespace()
        .find_map(|field| field.strip_suffix('%'))
        .ok_or_else(|| ExecutorError::DiskProbe(format!("no capacity column in {row:?}")))?;
    let used: f64 = used
        .parse()
        .map_err(|_| ExecutorError::DiskProbe(format!("bad capacity {used:?}")))?;
    Ok(100.0 - used)
}

/// Check free space every `interval` and run `prune` once per low period.
pub fn spawn_disk_monitor(
    probe: Arc<dyn FreeSpaceProbe>,
    threshold: f64,
    interval: Duration,
    prune: CommandSpec,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut monitor = DiskMonitor::new(threshold);
        let mut timer = tokio::time::interval(interval);
        info!(threshold, interval_secs = interval.as_secs(), "Disk monitor started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            let free = match probe.free_percent().await {
                Ok(free) => free,
                Err(e) => {
                    warn!(error = %e, "Free space check failed");
                    continue;
                }
            };
            debug!(free_percent = free, "Free space checked");
            if !monitor.observe(free) {
                continue;
            }

            info!(free_percent = free, threshold, program = %prune.program, "Low on disk, pruning");
            match run_captured(&prune, cancel.child_token()).await {
                Ok((0, _)) => info!("Prune finished"),
                Ok((code, output)) => warn!(
                    exit_code = code,
                    stderr = %String::from_utf8_lossy(&output.stderr_bytes()),
                    "Prune command failed"
                ),
                Err(e) => warn!(error = %e, "Prune command could not run"),
            }
        }
        debug!("Disk monitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[test]
    fn test_monitor_fires_once_per_low_period() {
        let mut monitor = DiskMonitor::new(10.0);
        assert!(!monitor.observe(50.0));
        assert!(monitor.observe(9.0));
        assert!(!monitor.observe(5.0));
        assert!(!monitor.observe(8.0));
        // Sitting exactly on the threshold does not re-arm.
        assert!(!monitor.observe(10.0));
        assert!(!monitor.observe(9.5));
        assert!(!monitor.observe(10.5));
        assert!(monitor.observe(2.0));
    }

    #[test]
    fn test_parse_df_output() {
        let text = "Filesystem     1024-blocks      Used Available Capacity Mounted on\n\
                    /dev/sda1        102400000  81920000  20480000      80% /\n";
        assert_eq!(parse_df_output(text).unwrap(), 20.0);
    }

    #[test]
    fn test_parse_df_output_rejects_garbage() {
        assert!(parse_df_output("").is_err());
        assert!(parse_df_output("Filesystem\n/dev/sda1 1 2 3\n").is_err());
        assert!(parse_df_output("Filesystem\n/dev/sda1 1 2 3 x% /\n").is_err());
    }

    struct Readings(Mutex<VecDeque<f64>>);

    #[async_trait]
    impl FreeSpaceProbe for Readings {
        async fn free_percent(&self) -> Result<f64, ExecutorError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ExecutorError::DiskProbe("no more readings".into()))
        }
    }

    #[tokio::test]
    async fn test_monitor_task_prunes_on_low_edges() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("prunes");
        let prune = CommandSpec::new("sh")
            .arg("-c")
            .arg(format!("echo pruned >> {}", log.display()));
        let probe = Arc::new(Readings(Mutex::new(
            [50.0, 5.0, 4.0, 3.0, 40.0, 6.0].into_iter().collect(),
        )));
        let cancel = CancellationToken::new();

        let task = spawn_disk_monitor(
            probe,
            10.0,
            Duration::from_millis(5),
            prune,
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        task.await.unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_df_probe_reads_root() {
        let free = DfProbe::new(PathBuf::from("/")).free_percent().await.unwrap();
        assert!((0.0..=100.0).contains(&free));
    }
}
