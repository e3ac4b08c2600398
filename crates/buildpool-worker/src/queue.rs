//! A worker's local job queue and its membership in a pool.
//!
//! The pool only sees a [`WorkerLink`]; the [`LocalWorker`] owns the
//! registration, so dropping it disconnects the worker.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use buildpool_scheduler::{Assignment, CapRegistry, JobDispatch, Pool, Registration};

use crate::config::WorkerConfig;
use crate::error::ExecutorError;
use crate::executor::Executor;
use crate::hygiene::{spawn_disk_monitor, DfProbe};
use crate::process::{run_captured, CommandSpec};

struct Inner {
    config: WorkerConfig,
    executor: Executor,
    pool: Arc<Pool>,
    running: AtomicU32,
    /// Cleared while draining for a self-update.
    accepting: AtomicBool,
    update_pending: AtomicBool,
    drained: Notify,
    registration: Mutex<Option<Registration>>,
    shutdown: CancellationToken,
}

impl Inner {
    /// Take a slot if one is free. Loses cleanly to a concurrent taker.
    fn try_reserve(&self) -> bool {
        if !self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        let capacity = self.config.capacity;
        self.running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        let previous = self.running.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.drained.notify_waiters();
        }
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.running.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// The handle the pool dispatches through.
pub struct WorkerLink {
    inner: Weak<Inner>,
}

impl JobDispatch for WorkerLink {
    fn offer(&self, assignment: Assignment) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        if !inner.try_reserve() {
            debug!(worker = %inner.config.name, job_id = %assignment.job_id, "Offer declined");
            return false;
        }

        info!(
            worker = %inner.config.name,
            job_id = %assignment.job_id,
            running = inner.running.load(Ordering::SeqCst),
            capacity = inner.config.capacity,
            "Job accepted"
        );
        tokio::spawn(async move {
            let finish = inner.executor.run(assignment).await;
            // Free the slot first: the pool offers the next queued job as
            // soon as it sees the completion.
            inner.release();
            finish.send().await;
        });
        true
    }

    fn self_update(&self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let Some(command) = CommandSpec::from_argv(&inner.config.update_command) else {
            info!(worker = %inner.config.name, "No update command configured");
            return false;
        };
        if inner.update_pending.swap(true, Ordering::SeqCst) {
            return true;
        }

        inner.accepting.store(false, Ordering::SeqCst);
        info!(worker = %inner.config.name, "Draining for self-update");
        tokio::spawn(run_update(inner, command));
        true
    }
}

async fn run_update(inner: Arc<Inner>, command: CommandSpec) {
    inner.wait_drained().await;

    info!(worker = %inner.config.name, program = %command.program, "Running update command");
    match run_captured(&command, inner.shutdown.child_token()).await {
        Ok((0, _)) => info!(worker = %inner.config.name, "Update finished"),
        Ok((code, output)) => warn!(
            worker = %inner.config.name,
            exit_code = code,
            stderr = %String::from_utf8_lossy(&output.stderr_bytes()),
            "Update command failed"
        ),
        Err(e) => error!(worker = %inner.config.name, error = %e, "Update command could not run"),
    }

    inner.accepting.store(true, Ordering::SeqCst);
    inner.update_pending.store(false, Ordering::SeqCst);

    // Jobs declined while draining are still queued in the pool.
    if let Some(registration) = inner
        .registration
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
    {
        registration.ready();
    }
}

/// A worker running on this host.
pub struct LocalWorker {
    inner: Arc<Inner>,
}

impl LocalWorker {
    /// Resolve the worker's registration capability file and join its pool.
    pub async fn connect(config: WorkerConfig, caps: &CapRegistry) -> Result<Self, ExecutorError> {
        let pool = caps
            .resolve_file(&config.registration_cap)
            .await?
            .into_registration()?;
        Ok(Self::register(config, pool))
    }

    /// Join `pool` directly.
    pub fn register(config: WorkerConfig, pool: Arc<Pool>) -> Self {
        let inner = Arc::new(Inner {
            executor: Executor::new(config.engine.clone()),
            config,
            pool,
            running: AtomicU32::new(0),
            accepting: AtomicBool::new(true),
            update_pending: AtomicBool::new(false),
            drained: Notify::new(),
            registration: Mutex::new(None),
            shutdown: CancellationToken::new(),
        });
        let link = Arc::new(WorkerLink {
            inner: Arc::downgrade(&inner),
        });
        let registration = inner.pool.register(inner.config.worker_info(), link);
        *inner
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(registration);

        if let (Some(threshold), Some(prune)) = (
            inner.config.prune_threshold,
            CommandSpec::from_argv(&inner.config.prune_command),
        ) {
            spawn_disk_monitor(
                Arc::new(DfProbe::new(inner.config.disk_path.clone())),
                threshold,
                std::time::Duration::from_secs(inner.config.disk_check_interval_secs.max(1)),
                prune,
                inner.shutdown.child_token(),
            );
        }

        info!(
            worker = %inner.config.name,
            pool = %inner.pool.name(),
            capacity = inner.config.capacity,
            "Local worker started"
        );
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn running(&self) -> u32 {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Leave the pool. Jobs still running here fail as disconnected.
    pub fn disconnect(self) {
        drop(self);
    }
}

impl Drop for LocalWorker {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        let registration = self
            .inner
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(registration) = registration {
            info!(worker = %self.inner.config.name, "Local worker leaving pool");
            registration.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use buildpool_core::{BuildAction, DockerfileSource, JobError, JobRequest, JobStatus};
    use buildpool_scheduler::RetryPolicy;
    use std::time::Duration;

    fn config(name: &str, capacity: u32, script: &str) -> WorkerConfig {
        WorkerConfig {
            name: name.into(),
            capacity,
            engine: EngineConfig {
                program: "sh".into(),
                args: vec!["-c".into(), script.into(), "sh".into()],
                ..EngineConfig::default()
            },
            ..WorkerConfig::default()
        }
    }

    fn request() -> JobRequest {
        JobRequest::new(
            "linux",
            BuildAction::new(DockerfileSource::Contents("FROM scratch".into())),
        )
    }

    #[tokio::test]
    async fn test_local_worker_runs_jobs_within_capacity() {
        let pool = Pool::new("linux", RetryPolicy::Never, 16);
        let worker = LocalWorker::register(config("w1", 2, "cat >/dev/null; echo ok"), pool.clone());

        let jobs: Vec<_> = (0..4).map(|_| pool.submit(request()).unwrap()).collect();
        assert!(worker.running() <= 2);
        for job in &jobs {
            let outcome = tokio::time::timeout(Duration::from_secs(10), job.result())
                .await
                .unwrap();
            assert_eq!(outcome, Ok("ok\n".to_string()));
        }
        assert_eq!(pool.workers()[0].running, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_slot_worker_drains_burst_of_jobs() {
        let pool = Pool::new("linux", RetryPolicy::Never, 16);
        let worker = LocalWorker::register(config("w1", 1, "cat >/dev/null; echo ok"), pool.clone());

        let jobs: Vec<_> = (0..40).map(|_| pool.submit(request()).unwrap()).collect();
        for job in &jobs {
            let outcome = tokio::time::timeout(Duration::from_secs(10), job.result())
                .await
                .unwrap();
            assert_eq!(outcome, Ok("ok\n".to_string()));
        }
        assert_eq!(pool.queue_lengths(), (0, 0));
        assert_eq!(worker.running(), 0);
        assert_eq!(pool.workers()[0].running, 0);
    }

    #[tokio::test]
    async fn test_slot_is_free_once_result_is_visible() {
        let pool = Pool::new("linux", RetryPolicy::Never, 16);
        let worker = LocalWorker::register(config("w1", 1, "cat >/dev/null; echo ok"), pool.clone());

        for _ in 0..3 {
            let job = pool.submit(request()).unwrap();
            let outcome = tokio::time::timeout(Duration::from_secs(10), job.result())
                .await
                .unwrap();
            assert_eq!(outcome, Ok("ok\n".to_string()));
            assert_eq!(worker.running(), 0);
        }
    }

    #[tokio::test]
    async fn test_self_update_without_command_is_refused() {
        let pool = Pool::new("linux", RetryPolicy::Never, 16);
        let _worker = LocalWorker::register(config("w1", 1, "true"), pool.clone());
        assert!(!pool.self_update("w1").unwrap());
    }

    #[tokio::test]
    async fn test_self_update_drains_then_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("updated");
        let mut cfg = config("w1", 1, "cat >/dev/null; sleep 0.2; echo built");
        cfg.update_command = vec![
            "sh".into(),
            "-c".into(),
            format!("touch {}", marker.display()),
        ];
        let pool = Pool::new("linux", RetryPolicy::Never, 16);
        let worker = LocalWorker::register(cfg, pool.clone());

        let running = pool.submit(request()).unwrap();
        assert!(pool.self_update("w1").unwrap());
        assert!(pool.self_update("w1").unwrap());

        // Submitted while draining: stays queued until the update is done.
        let queued = pool.submit(request()).unwrap();
        assert_eq!(queued.status(), JobStatus::Queued);

        let first = tokio::time::timeout(Duration::from_secs(10), running.result())
            .await
            .unwrap();
        assert_eq!(first, Ok("built\n".to_string()));

        let second = tokio::time::timeout(Duration::from_secs(10), queued.result())
            .await
            .unwrap();
        assert_eq!(second, Ok("built\n".to_string()));
        assert!(marker.exists());
        assert_eq!(pool.workers().len(), 1);
        drop(worker);
    }

    #[tokio::test]
    async fn test_dropping_worker_disconnects() {
        let pool = Pool::new("linux", RetryPolicy::Never, 16);
        let worker = LocalWorker::register(config("w1", 1, "exec sleep 30"), pool.clone());
        let job = pool.submit(request()).unwrap();

        worker.disconnect();
        let outcome = tokio::time::timeout(Duration::from_secs(5), job.result())
            .await
            .unwrap();
        assert_eq!(outcome, Err(JobError::WorkerDisconnected));
        assert!(pool.workers().is_empty());
    }
}
