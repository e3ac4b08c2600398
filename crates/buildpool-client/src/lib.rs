//! buildpool client library
//!
//! Talks to a `buildpoold` over HTTP using a capability file for
//! authorization. Used by the `buildpool` CLI.

pub mod error;
pub mod http;

pub use error::ClientError;
pub use http::BuildpoolClient;

use buildpool_core::CapId;

/// Follow a job's log from `start` until it is complete, handing each chunk
/// to `sink`. Returns the offset after the last byte.
pub async fn tail_log<F>(
    client: &BuildpoolClient,
    job: &CapId,
    mut start: u64,
    mut sink: F,
) -> Result<u64, ClientError>
where
    F: FnMut(&[u8]),
{
    loop {
        let (chunk, next) = client.log(job, start).await?;
        if chunk.is_empty() {
            return Ok(start);
        }
        sink(&chunk);
        start = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use buildpool_core::{
        BuildAction, DockerfileSource, JobError, JobRequest, JobStatus, WorkerInfo,
    };
    use buildpool_scheduler::http::create_router;
    use buildpool_scheduler::{AppState, Assignment, Config, JobDispatch, Registration};
    use reqwest::StatusCode;

    /// Writes the Dockerfile back as log output and result.
    struct Echo;

    impl JobDispatch for Echo {
        fn offer(&self, assignment: Assignment) -> bool {
            tokio::spawn(async move {
                let reporter = assignment.reporter;
                let text = match &assignment.request.action.dockerfile {
                    DockerfileSource::Contents(text) => text.clone(),
                    DockerfileSource::Path(path) => path.clone(),
                };
                reporter.started().await.unwrap();
                for line in text.lines() {
                    reporter.stdout(format!("{line}\n").into_bytes()).await.unwrap();
                }
                reporter.complete(0, "sha256:abc".into()).await.unwrap();
            });
            true
        }

        fn self_update(&self) -> bool {
            false
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        submit: BuildpoolClient,
        admin: BuildpoolClient,
        _registration: Registration,
    }

    async fn start() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let state = AppState::new(&Config {
            public_url: url,
            pools: vec!["linux".into()],
            ..Config::default()
        });
        state.write_capability_files(dir.path()).await.unwrap();
        let registration = state
            .scheduler
            .pool("linux")
            .unwrap()
            .register(WorkerInfo::new("w1", 2), Arc::new(Echo));

        let router = create_router(state);
        tokio::spawn(async move { axum::serve(listener, router).await });

        Fixture {
            submit: BuildpoolClient::from_cap_file(&dir.path().join("submission.cap")).unwrap(),
            admin: BuildpoolClient::from_cap_file(&dir.path().join("admin.cap")).unwrap(),
            _dir: dir,
            _registration: registration,
        }
    }

    fn request(text: &str) -> JobRequest {
        JobRequest::new("linux", BuildAction::new(DockerfileSource::Contents(text.into())))
    }

    #[tokio::test]
    async fn test_submit_tail_and_result() {
        let fx = start().await;
        assert!(fx.submit.health().await.unwrap());
        assert_eq!(fx.submit.service(), Some(buildpool_scheduler::Service::Submission));

        let job = fx.submit.submit_job(&request("FROM scratch\nRUN true")).await.unwrap();
        let mut log = Vec::new();
        let end = tail_log(&fx.submit, &job, 0, |chunk| log.extend_from_slice(chunk))
            .await
            .unwrap();
        assert_eq!(log, b"FROM scratch\nRUN true\n");
        assert_eq!(end, log.len() as u64);

        assert_eq!(fx.submit.result(&job).await.unwrap(), Ok("sha256:abc".to_string()));
        let status = fx.submit.status(&job).await.unwrap();
        assert_eq!(status.status, JobStatus::Succeeded);
        assert_eq!(status.worker.as_deref(), Some("w1"));

        fx.submit.release(&job).await.unwrap();
        assert!(fx.submit.status(&job).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_submission_is_user_error() {
        let fx = start().await;
        let mut bad = request("FROM scratch");
        bad.source = Some(buildpool_core::GitSource {
            repository: "https://git.example.com/app.git".into(),
            commits: vec![],
        });
        let err = fx.submit.submit(&bad).await.unwrap_err();
        assert!(err.is_user_error());
        assert!(matches!(err, ClientError::Api { status: StatusCode::BAD_REQUEST, .. }));
    }

    #[tokio::test]
    async fn test_admin_surface() {
        let fx = start().await;
        assert_eq!(fx.admin.pools().await.unwrap(), vec!["linux".to_string()]);

        let workers = fx.admin.workers("linux").await.unwrap();
        assert_eq!(workers.len(), 1);
        assert!(workers[0].active);

        fx.admin.set_active("linux", "w1", false).await.unwrap();
        assert!(!fx.admin.workers("linux").await.unwrap()[0].active);
        assert!(fx.admin.dump("linux").await.unwrap().contains("w1"));
        assert!(!fx.admin.self_update("linux", "w1").await.unwrap());
        assert!(fx.admin.unassignable("linux").await.unwrap().is_empty());

        let err = fx.admin.set_active("linux", "w9", true).await.unwrap_err();
        assert!(err.is_user_error());
        assert_eq!(err.candidates(), ["w1".to_string()]);

        let err = fx.admin.workers("nope").await.unwrap_err();
        assert_eq!(err.candidates(), ["linux".to_string()]);
    }

    #[tokio::test]
    async fn test_wrong_capability_is_rejected() {
        let fx = start().await;
        let err = fx.submit.pools().await.unwrap_err();
        assert!(matches!(err, ClientError::Api { status: StatusCode::FORBIDDEN, .. }));

        let anonymous = BuildpoolClient::new(fx.admin.base_url(), "bogus");
        let err = anonymous.pools().await.unwrap_err();
        assert!(matches!(err, ClientError::Api { status: StatusCode::UNAUTHORIZED, .. }));
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let fx = start().await;
        fx.admin.set_active("linux", "w1", false).await.unwrap();

        let job = fx.submit.submit_job(&request("FROM scratch")).await.unwrap();
        fx.submit.cancel(&job).await.unwrap();
        assert_eq!(fx.submit.result(&job).await.unwrap(), Err(JobError::Cancelled));
    }
}
