//! The seam between a pool and the workers it hands jobs to.
//!
//! A pool offers an [`Assignment`] to a [`JobDispatch`]; the worker reports
//! back through the assignment's [`JobReporter`]. Reports travel through a
//! bounded channel per job, so a slow log consumer pushes back on the
//! worker's output path instead of growing without limit, and they are
//! applied strictly in the order the worker sent them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use buildpool_core::{CoreError, JobError, JobId, JobRequest};

use crate::job::Job;
use crate::pool::Pool;

/// A worker endpoint as the pool sees it.
pub trait JobDispatch: Send + Sync {
    /// Offer a job. Returning false hands the assignment back and the pool
    /// does not count the slot as used.
    fn offer(&self, assignment: Assignment) -> bool;

    /// Ask the worker to update itself once it has drained. Returns true if
    /// an update was scheduled.
    fn self_update(&self) -> bool;
}

/// A job handed to a worker.
pub struct Assignment {
    pub job_id: JobId,
    pub request: Arc<JobRequest>,
    pub reporter: JobReporter,
    /// Fired when the submitter cancels the job or the worker is dropped.
    pub cancel: CancellationToken,
}

/// Which output stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
pub(crate) enum Report {
    Started,
    Output(OutputStream, Vec<u8>),
    Complete { exit_code: i32, output: String },
    Failed(String),
}

/// The worker's side of a job: stream output and report completion.
///
/// Clones share one completion flag; exactly one `complete` or `fail` is
/// accepted across all of them and nothing is accepted afterwards.
#[derive(Clone)]
pub struct JobReporter {
    job_id: JobId,
    tx: mpsc::Sender<Report>,
    completed: Arc<AtomicBool>,
}

impl JobReporter {
    pub(crate) fn channel(job_id: JobId, capacity: usize) -> (Self, mpsc::Receiver<Report>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                job_id,
                tx,
                completed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    async fn send(&self, report: Report) -> Result<(), CoreError> {
        self.tx.send(report).await.map_err(|_| {
            CoreError::ProtocolViolation(format!("job {} is no longer accepting reports", self.job_id))
        })
    }

    fn reject_after_completion(&self, what: &str) -> Result<(), CoreError> {
        if self.is_completed() {
            warn!(job_id = %self.job_id, call = what, "Report after completion ignored");
            return Err(CoreError::ProtocolViolation(format!(
                "{what} after completion of job {}",
                self.job_id
            )));
        }
        Ok(())
    }

    /// The build engine has been spawned.
    pub async fn started(&self) -> Result<(), CoreError> {
        self.reject_after_completion("started")?;
        self.send(Report::Started).await
    }

    pub async fn stdout(&self, chunk: Vec<u8>) -> Result<(), CoreError> {
        self.output(OutputStream::Stdout, chunk).await
    }

    pub async fn stderr(&self, chunk: Vec<u8>) -> Result<(), CoreError> {
        self.output(OutputStream::Stderr, chunk).await
    }

    pub async fn output(&self, stream: OutputStream, chunk: Vec<u8>) -> Result<(), CoreError> {
        self.reject_after_completion("output")?;
        if chunk.is_empty() {
            return Ok(());
        }
        self.send(Report::Output(stream, chunk)).await
    }

    /// The build engine exited. Terminal.
    pub async fn complete(&self, exit_code: i32, output: String) -> Result<(), CoreError> {
        if self.completed.swap(true, Ordering::SeqCst) {
            warn!(job_id = %self.job_id, exit_code, "Duplicate completion ignored");
            return Err(CoreError::ProtocolViolation(format!(
                "duplicate completion of job {}",
                self.job_id
            )));
        }
        self.send(Report::Complete { exit_code, output }).await
    }

    /// The build engine could not be run at all. Terminal.
    pub async fn fail(&self, message: impl Into<String>) -> Result<(), CoreError> {
        if self.completed.swap(true, Ordering::SeqCst) {
            warn!(job_id = %self.job_id, "Failure after completion ignored");
            return Err(CoreError::ProtocolViolation(format!(
                "duplicate completion of job {}",
                self.job_id
            )));
        }
        self.send(Report::Failed(message.into())).await
    }
}

/// Apply one attempt's reports to its job until the worker completes it.
pub(crate) async fn pump_reports(
    pool: Weak<Pool>,
    job: Arc<Job>,
    attempt: u32,
    mut rx: mpsc::Receiver<Report>,
) {
    while let Some(report) = rx.recv().await {
        match report {
            Report::Started => {
                if let Err(e) = job.mark_running(attempt) {
                    debug!(job_id = %job.id(), error = %e, "Ignoring start report");
                }
            }
            Report::Output(stream, bytes) => {
                trace!(job_id = %job.id(), ?stream, len = bytes.len(), "Output chunk");
                if let Err(e) = job.append_log(attempt, &bytes) {
                    warn!(job_id = %job.id(), error = %e, "Dropping output chunk");
                }
            }
            Report::Complete { exit_code, output } => {
                let outcome = if exit_code == 0 {
                    Ok(output)
                } else {
                    Err(JobError::BuildFailed { exit_code, output })
                };
                if let Some(pool) = pool.upgrade() {
                    pool.finish(job.id(), attempt, outcome);
                }
                return;
            }
            Report::Failed(message) => {
                if let Some(pool) = pool.upgrade() {
                    pool.finish(job.id(), attempt, Err(JobError::Engine { message }));
                }
                return;
            }
        }
    }

    // Every reporter clone was dropped without a completion.
    if let Some(pool) = pool.upgrade() {
        pool.finish(
            job.id(),
            attempt,
            Err(JobError::Engine {
                message: "worker dropped the job without reporting completion".to_string(),
            }),
        );
    }
}
