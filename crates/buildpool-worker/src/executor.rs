//! Runs an assigned job's engine steps and reports back to the pool.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use buildpool_scheduler::{Assignment, JobReporter};

use crate::config::EngineConfig;
use crate::engine::{build_steps, Step};
use crate::error::ExecutorError;
use crate::process::{self, ProcessOutput};

/// Forwards a step's output into the job log and keeps its stdout.
struct StepOutput {
    reporter: JobReporter,
    stdout: Mutex<Vec<u8>>,
    stderr_tail: Mutex<Vec<u8>>,
}

/// Bytes of stderr kept for the failure message.
const STDERR_TAIL: usize = 4 * 1024;

impl StepOutput {
    fn new(reporter: JobReporter) -> Arc<Self> {
        Arc::new(Self {
            reporter,
            stdout: Mutex::new(Vec::new()),
            stderr_tail: Mutex::new(Vec::new()),
        })
    }

    fn stdout_text(&self) -> String {
        let stdout = self.stdout.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&stdout).into_owned()
    }

    fn failure_text(&self) -> String {
        let mut text = self.stdout_text();
        let tail = self.stderr_tail.lock().unwrap_or_else(PoisonError::into_inner);
        text.push_str(&String::from_utf8_lossy(&tail));
        text
    }
}

#[async_trait]
impl ProcessOutput for StepOutput {
    async fn stdout(&self, chunk: Vec<u8>) {
        self.stdout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&chunk);
        if let Err(e) = self.reporter.stdout(chunk).await {
            debug!(job_id = %self.reporter.job_id(), error = %e, "Dropping stdout chunk");
        }
    }

    async fn stderr(&self, chunk: Vec<u8>) {
        {
            let mut tail = self.stderr_tail.lock().unwrap_or_else(PoisonError::into_inner);
            tail.extend_from_slice(&chunk);
            if tail.len() > STDERR_TAIL {
                let excess = tail.len() - STDERR_TAIL;
                tail.drain(..excess);
            }
        }
        if let Err(e) = self.reporter.stderr(chunk).await {
            debug!(job_id = %self.reporter.job_id(), error = %e, "Dropping stderr chunk");
        }
    }

    async fn complete(&self, exit_code: i32) {
        debug!(job_id = %self.reporter.job_id(), exit_code, "Step finished");
    }
}

/// Drives the build engine for assigned jobs.
#[derive(Debug, Clone)]
pub struct Executor {
    engine: EngineConfig,
}

impl Executor {
    pub fn new(engine: EngineConfig) -> Self {
        Self { engine }
    }

    /// Run every step of the assignment.
    ///
    /// The terminal report is returned unsent. Callers free the job's slot
    /// before calling [`Finish::send`].
    pub async fn run(&self, assignment: Assignment) -> Finish {
        let Assignment {
            job_id,
            request,
            reporter,
            cancel,
        } = assignment;

        if let Err(e) = reporter.started().await {
            warn!(job_id = %job_id, error = %e, "Job no longer wanted");
            return Finish::abandoned(reporter);
        }

        let steps = build_steps(&self.engine, &job_id, &request);
        info!(job_id = %job_id, steps = steps.len(), "Running build");

        let mut last_stdout = String::new();
        for step in steps {
            if cancel.is_cancelled() {
                info!(job_id = %job_id, step = step.name, "Cancelled before step");
                return Finish::complete(reporter, 130, last_stdout);
            }

            match run_step(&step, &reporter, cancel.child_token()).await {
                Ok((0, output)) => last_stdout = output.stdout_text(),
                Ok((exit_code, output)) => {
                    info!(job_id = %job_id, step = step.name, exit_code, "Build step failed");
                    return Finish::complete(reporter, exit_code, output.failure_text());
                }
                Err(e) => {
                    warn!(job_id = %job_id, step = step.name, error = %e, "Build step could not run");
                    return Finish {
                        reporter,
                        report: FinalReport::Failed(e.to_string()),
                    };
                }
            }
        }

        Finish::complete(reporter, 0, last_stdout)
    }
}

enum FinalReport {
    Complete { exit_code: i32, output: String },
    Failed(String),
    /// The pool no longer wants the job; nothing to send.
    Abandoned,
}

/// A finished run's last word to the pool.
#[must_use = "the job stays running in the pool until the finish is sent"]
pub struct Finish {
    reporter: JobReporter,
    report: FinalReport,
}

impl Finish {
    fn complete(reporter: JobReporter, exit_code: i32, output: String) -> Self {
        Self {
            reporter,
            report: FinalReport::Complete { exit_code, output },
        }
    }

    fn abandoned(reporter: JobReporter) -> Self {
        Self {
            reporter,
            report: FinalReport::Abandoned,
        }
    }

    /// Deliver the terminal report.
    pub async fn send(self) {
        let sent = match self.report {
            FinalReport::Complete { exit_code, output } => {
                self.reporter.complete(exit_code, output).await
            }
            FinalReport::Failed(message) => self.reporter.fail(message).await,
            FinalReport::Abandoned => return,
        };
        if let Err(e) = sent {
            debug!(job_id = %self.reporter.job_id(), error = %e, "Dropping final report");
        }
    }
}

async fn run_step(
    step: &Step,
    reporter: &JobReporter,
    cancel: CancellationToken,
) -> Result<(i32, Arc<StepOutput>), ExecutorError> {
    let output = StepOutput::new(reporter.clone());
    let handle = process::spawn(&step.spec, output.clone(), cancel)?;
    if let Some(input) = &step.stdin {
        if let Err(e) = handle.stdin(input).await {
            // The engine may exit before reading everything; its exit code
            // tells the rest.
            debug!(step = step.name, error = %e, "Stdin write failed");
        }
    }
    handle.close_stdin().await;
    let exit_code = handle.wait().await?;
    Ok((exit_code, output))
}
