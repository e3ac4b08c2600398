//! Submission and ticket capabilities.
//!
//! `Submission::submit` turns a request into a [`Ticket`]; the ticket hands
//! out exactly one [`Job`]. Admission (pool lookup, validation, priority)
//! is settled before the ticket exists.

use std::sync::Arc;

use buildpool_core::{CoreError, JobRequest};

use crate::job::Job;
use crate::scheduler::Scheduler;

/// Capability to submit builds.
#[derive(Clone)]
pub struct Submission {
    scheduler: Arc<Scheduler>,
}

impl Submission {
    pub(crate) fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }

    pub fn submit(&self, request: JobRequest) -> Result<Ticket, CoreError> {
        self.scheduler.submit(request)
    }
}

/// One-shot handle for an admitted job.
#[derive(Debug, Clone)]
pub struct Ticket {
    job: Arc<Job>,
}

impl Ticket {
    pub(crate) fn new(job: Arc<Job>) -> Self {
        Self { job }
    }

    /// The job this ticket was issued for. Every call returns the same job.
    pub fn job(&self) -> Arc<Job> {
        self.job.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch::{Assignment, JobDispatch};
    use buildpool_core::{BuildAction, DockerfileSource, WorkerInfo};
    use std::time::Duration;

    /// Completes every job immediately with a fixed output.
    struct EchoWorker;

    impl JobDispatch for EchoWorker {
        fn offer(&self, assignment: Assignment) -> bool {
            tokio::spawn(async move {
                let reporter = assignment.reporter;
                reporter.started().await.ok();
                reporter.stdout(b"building\n".to_vec()).await.ok();
                reporter
                    .complete(0, "sha256:0123 built\n".to_string())
                    .await
                    .ok();
            });
            true
        }

        fn self_update(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_submit_ticket_job_result_round_trip() {
        let scheduler = Scheduler::new(&Config {
            pools: vec!["linux".into()],
            ..Config::default()
        });
        let pool = scheduler.pool("linux").unwrap();
        let _reg = pool.register(WorkerInfo::new("w1", 1), Arc::new(EchoWorker));

        let ticket = scheduler
            .submission()
            .submit(JobRequest::new(
                "linux",
                BuildAction::new(DockerfileSource::Contents("FROM scratch".into())),
            ))
            .unwrap();

        let job = ticket.job();
        assert!(Arc::ptr_eq(&job, &ticket.job()));

        let outcome = tokio::time::timeout(Duration::from_secs(5), job.result())
            .await
            .unwrap();
        assert_eq!(outcome, Ok("sha256:0123 built\n".to_string()));
        assert_eq!(job.log(0).await.0, b"building\n");
    }
}
