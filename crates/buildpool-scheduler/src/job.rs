//! The job capability.
//!
//! A [`Job`] is the single handle a client keeps for a build, from the
//! moment it is queued until after its result is known. The pool moves it
//! between its queues and its running table; the client only ever sees the
//! status change.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use buildpool_core::{CoreError, JobError, JobId, JobOutcome, JobRequest, JobStatus};

use crate::log::LogBuffer;
use crate::pool::Pool;

struct JobState {
    status: JobStatus,
    worker: Option<String>,
    /// Bumped on every offer; reports tagged with an older attempt are stale.
    attempt: u32,
    retried: bool,
    cancel_requested: bool,
    cancel: Option<CancellationToken>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// A submitted build.
pub struct Job {
    id: JobId,
    request: Arc<JobRequest>,
    created_at: DateTime<Utc>,
    pool: Weak<Pool>,
    log: LogBuffer,
    state: Mutex<JobState>,
    result: watch::Sender<Option<JobOutcome>>,
}

impl Job {
    pub(crate) fn new(request: JobRequest, pool: Weak<Pool>) -> Arc<Self> {
        let (result, _) = watch::channel(None);
        Arc::new(Self {
            id: JobId::generate(),
            request: Arc::new(request),
            created_at: Utc::now(),
            pool,
            log: LogBuffer::new(),
            state: Mutex::new(JobState {
                status: JobStatus::Queued,
                worker: None,
                attempt: 0,
                retried: false,
                cancel_requested: false,
                cancel: None,
                started_at: None,
                finished_at: None,
            }),
            result,
        })
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn request(&self) -> &Arc<JobRequest> {
        &self.request
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    /// Worker currently bound to the job, if any.
    pub fn worker(&self) -> Option<String> {
        self.lock().worker.clone()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.lock().finished_at
    }

    /// Read the log from `start`.
    ///
    /// Suspends until bytes past `start` exist or the job is finished.
    /// `("", start)` is returned once the job is terminal and everything has
    /// been delivered: callers loop until they see it.
    pub async fn log(&self, start: u64) -> (Vec<u8>, u64) {
        self.log.read(start).await
    }

    /// Wait for the job to finish and return its outcome.
    ///
    /// Dropping the returned future stops waiting; it never affects the job.
    pub async fn result(&self) -> JobOutcome {
        let mut rx = self.result.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone().unwrap_or(Err(JobError::Cancelled)),
            // The sender lives in `self`, so this only happens mid-drop.
            Err(_) => Err(JobError::Cancelled),
        };
        outcome
    }

    /// The outcome if the job already finished.
    pub fn try_result(&self) -> Option<JobOutcome> {
        self.result.borrow().clone()
    }

    /// Cancel the job. Repeated calls are no-ops.
    ///
    /// A queued job is finished immediately. A running job has the request
    /// forwarded to its worker once; it finishes when the worker reports the
    /// process gone.
    pub fn cancel(&self) {
        match self.pool.upgrade() {
            Some(pool) => pool.cancel(self),
            None => {
                self.finish(Err(JobError::Cancelled));
            }
        }
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.lock().cancel_requested
    }

    pub(crate) fn retried(&self) -> bool {
        self.lock().retried
    }

    /// Record the cancel request. Returns the worker's token the first time
    /// only, so the request reaches the worker at most once.
    pub(crate) fn request_cancel(&self) -> Option<CancellationToken> {
        let mut state = self.lock();
        if state.cancel_requested || state.status.is_terminal() {
            return None;
        }
        state.cancel_requested = true;
        state.cancel.clone()
    }

    /// Detach the current attempt's token without recording a cancel request.
    pub(crate) fn take_cancel_token(&self) -> Option<CancellationToken> {
        self.lock().cancel.take()
    }

    /// Bind the job to a worker for a new attempt. Returns the attempt number.
    pub(crate) fn assign(&self, worker: &str, cancel: CancellationToken) -> u32 {
        let mut state = self.lock();
        state.attempt += 1;
        state.status = JobStatus::Assigned;
        state.worker = Some(worker.to_string());
        state.cancel = Some(cancel);
        state.attempt
    }

    /// Undo [`Job::assign`] after the worker refused the offer.
    pub(crate) fn unassign(&self, attempt: u32) {
        let mut state = self.lock();
        if state.attempt == attempt && state.status == JobStatus::Assigned {
            state.status = JobStatus::Queued;
            state.worker = None;
            state.cancel = None;
        }
    }

    /// The worker started the build engine.
    pub(crate) fn mark_running(&self, attempt: u32) -> Result<(), CoreError> {
        let mut state = self.lock();
        if state.attempt != attempt || state.status != JobStatus::Assigned {
            return Err(CoreError::InvalidStateTransition {
                from: state.status.as_str().to_string(),
                to: JobStatus::Running.as_str().to_string(),
            });
        }
        state.status = JobStatus::Running;
        state.started_at = Some(Utc::now());
        debug!(job_id = %self.id, attempt, "Job running");
        Ok(())
    }

    /// Append worker output for `attempt`.
    pub(crate) fn append_log(&self, attempt: u32, bytes: &[u8]) -> Result<u64, CoreError> {
        if self.lock().attempt != attempt {
            return Err(CoreError::ProtocolViolation(format!(
                "log data from stale attempt {attempt}"
            )));
        }
        self.log.append(bytes)
    }

    /// Write a scheduler note into the log.
    pub(crate) fn note(&self, message: &str) {
        if let Err(e) = self.log.append(format!("[buildpool] {message}\n").as_bytes()) {
            debug!(job_id = %self.id, error = %e, "Dropping log note");
        }
    }

    /// Put the job back in the queued state after losing its worker.
    /// Allowed once per job.
    pub(crate) fn requeue(&self) -> bool {
        let mut state = self.lock();
        if state.retried || state.cancel_requested || state.status.is_terminal() {
            return false;
        }
        state.retried = true;
        state.status = JobStatus::Queued;
        state.worker = None;
        state.cancel = None;
        state.started_at = None;
        true
    }

    /// Fill the result slot. The first call wins; later calls return false.
    pub(crate) fn finish(&self, outcome: JobOutcome) -> bool {
        let status = match &outcome {
            Ok(_) => JobStatus::Succeeded,
            Err(JobError::Cancelled) => JobStatus::Cancelled,
            Err(_) => JobStatus::Failed,
        };
        {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.status = status;
            state.finished_at = Some(Utc::now());
            state.cancel = None;
        }
        self.log.close();
        self.result.send_replace(Some(outcome));
        info!(job_id = %self.id, status = status.as_str(), "Job finished");
        true
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("pool", &self.request.pool)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildpool_core::{BuildAction, DockerfileSource};
    use std::time::Duration;

    fn detached_job() -> Arc<Job> {
        let request = JobRequest::new(
            "pool",
            BuildAction::new(DockerfileSource::Contents("FROM scratch".into())),
        );
        Job::new(request, Weak::new())
    }

    #[tokio::test]
    async fn test_result_waits_for_finish() {
        let job = detached_job();
        let waiter = {
            let job = job.clone();
            tokio::spawn(async move { job.result().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        assert!(job.finish(Ok("done".into())));
        assert_eq!(waiter.await.unwrap(), Ok("done".to_string()));
        assert_eq!(job.status(), JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_first_finish_wins() {
        let job = detached_job();
        assert!(job.finish(Err(JobError::Cancelled)));
        assert!(!job.finish(Ok("late".into())));
        assert_eq!(job.result().await, Err(JobError::Cancelled));
        assert_eq!(job.status(), JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_affect_job() {
        let job = detached_job();
        let waited = tokio::time::timeout(Duration::from_millis(10), job.result()).await;
        assert!(waited.is_err());
        assert_eq!(job.status(), JobStatus::Queued);
        assert!(job.try_result().is_none());
    }

    #[test]
    fn test_stale_attempt_output_is_rejected() {
        let job = detached_job();
        let first = job.assign("w1", CancellationToken::new());
        job.unassign(first);
        let second = job.assign("w2", CancellationToken::new());

        assert!(job.append_log(first, b"old").is_err());
        assert_eq!(job.append_log(second, b"new").unwrap(), 3);
        assert!(job.mark_running(first).is_err());
        assert!(job.mark_running(second).is_ok());
        assert_eq!(job.worker().as_deref(), Some("w2"));
    }

    #[test]
    fn test_cancel_token_handed_out_once() {
        let job = detached_job();
        let token = CancellationToken::new();
        job.assign("w1", token.clone());

        let first = job.request_cancel();
        assert!(first.is_some());
        assert!(job.request_cancel().is_none());
        assert!(job.cancel_requested());
    }

    #[test]
    fn test_requeue_only_once() {
        let job = detached_job();
        job.assign("w1", CancellationToken::new());
        assert!(job.requeue());
        assert_eq!(job.status(), JobStatus::Queued);
        assert!(job.retried());

        job.assign("w2", CancellationToken::new());
        assert!(!job.requeue());
    }

    #[tokio::test]
    async fn test_note_after_finish_leaves_log_alone() {
        let job = detached_job();
        job.note("queued behind 2 jobs");
        assert!(job.finish(Err(JobError::Cancelled)));
        job.note("worker went away");

        let (chunk, next) = job.log(0).await;
        assert_eq!(chunk, b"[buildpool] queued behind 2 jobs\n");
        assert_eq!(job.log(next).await, (Vec::new(), next));
    }
}
