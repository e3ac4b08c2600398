//! HTTP server for the scheduler.
//!
//! Provides endpoints for:
//! - Submission (`/v1/submit`) and ticket redemption (`/v1/tickets/:id/job`)
//! - Job log, status, result and cancel (`/v1/jobs/:id/...`)
//! - Capability release (`/v1/caps/:id`)
//! - Pool administration (`/v1/pools/...`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)
//!
//! Sturdy capabilities are presented as `Authorization: Bearer <token>`.
//! Tickets and jobs are live capabilities addressed by their id in the path.

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod auth;
mod error;
mod handlers;

pub use auth::Bearer;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Submission and job routes
        .route("/v1/submit", post(handlers::submit))
        .route("/v1/tickets/:id/job", post(handlers::redeem_ticket))
        .route("/v1/jobs/:id/log", get(handlers::job_log))
        .route("/v1/jobs/:id/result", get(handlers::job_result))
        .route("/v1/jobs/:id/status", get(handlers::job_status))
        .route("/v1/jobs/:id/cancel", post(handlers::cancel_job))
        .route("/v1/caps/:id", delete(handlers::release_cap))
        // Admin routes
        .route("/v1/pools", get(handlers::list_pools))
        .route("/v1/pools/:pool", get(handlers::dump_pool))
        .route("/v1/pools/:pool/workers", get(handlers::list_workers))
        .route(
            "/v1/pools/:pool/workers/:worker/active",
            post(handlers::set_worker_active),
        )
        .route(
            "/v1/pools/:pool/workers/:worker/update",
            post(handlers::update_worker),
        )
        .route("/v1/pools/:pool/unassignable", get(handlers::list_unassignable))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch::{Assignment, JobDispatch};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use base64::{engine::general_purpose::STANDARD, Engine};
    use buildpool_core::api::{
        ErrorResponse, JobResultResponse, LogChunk, PoolsResponse, SubmitResponse,
        TicketJobResponse, UnassignableResponse, WorkersResponse,
    };
    use buildpool_core::{
        BuildAction, DockerfileSource, JobRequest, JobStatus, PushTarget, WorkerInfo,
    };
    use tower::ServiceExt;

    struct EchoWorker;

    impl JobDispatch for EchoWorker {
        fn offer(&self, assignment: Assignment) -> bool {
            tokio::spawn(async move {
                let reporter = assignment.reporter;
                reporter.started().await.ok();
                reporter.stdout(b"Step 1/1 : FROM scratch\n".to_vec()).await.ok();
                reporter.complete(0, "sha256:beef\n".into()).await.ok();
            });
            true
        }

        fn self_update(&self) -> bool {
            false
        }
    }

    struct Harness {
        state: Arc<AppState>,
        router: Router,
        submission: String,
        admin: String,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(&Config {
            pools: vec!["linux".into()],
            ..Config::default()
        });
        state.write_capability_files(dir.path()).await.unwrap();
        let submission = crate::caps::SturdyRef::load(&dir.path().join("submission.cap"))
            .unwrap()
            .token;
        let admin = crate::caps::SturdyRef::load(&dir.path().join("admin.cap"))
            .unwrap()
            .token;
        Harness {
            router: create_router(state.clone()),
            state,
            submission,
            admin,
            _dir: dir,
        }
    }

    async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, token: Option<&str>, body: String) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn request() -> JobRequest {
        JobRequest::new(
            "linux",
            BuildAction::new(DockerfileSource::Contents("FROM scratch".into())),
        )
    }

    #[tokio::test]
    async fn test_health_check() {
        let h = harness().await;
        let (status, body) = call(&h.router, get("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("ok"));
    }

    #[tokio::test]
    async fn test_submit_requires_submission_token() {
        let h = harness().await;
        let body = serde_json::to_string(&request()).unwrap();

        let (status, _) = call(&h.router, post_json("/v1/submit", None, body.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&h.router, post_json("/v1/submit", Some("bogus"), body.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&h.router, post_json("/v1/submit", Some(&h.admin), body)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_invalid_submission_is_bad_request() {
        let h = harness().await;
        let mut req = request();
        req.source = Some(buildpool_core::GitSource {
            repository: "https://git/app".into(),
            commits: vec![],
        });
        let (status, _) = call(
            &h.router,
            post_json("/v1/submit", Some(&h.submission), serde_json::to_string(&req).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_submit_tail_and_result() {
        let h = harness().await;
        let pool = h.state.scheduler.pool("linux").unwrap();
        let _reg = pool.register(WorkerInfo::new("w1", 1), Arc::new(EchoWorker));

        let (status, body) = call(
            &h.router,
            post_json(
                "/v1/submit",
                Some(&h.submission),
                serde_json::to_string(&request()).unwrap(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let ticket: SubmitResponse = serde_json::from_slice(&body).unwrap();

        let uri = format!("/v1/tickets/{}/job", ticket.ticket);
        let (_, body) = call(&h.router, post_json(&uri, None, String::new())).await;
        let job: TicketJobResponse = serde_json::from_slice(&body).unwrap();
        let (_, body) = call(&h.router, post_json(&uri, None, String::new())).await;
        let again: TicketJobResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(job.job, again.job);

        let (status, body) = call(&h.router, get(&format!("/v1/jobs/{}/result", job.job), None)).await;
        assert_eq!(status, StatusCode::OK);
        let result: JobResultResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(result.status, JobStatus::Succeeded);
        assert_eq!(result.into_outcome(), Ok("sha256:beef\n".to_string()));

        let mut start = 0;
        let mut log = Vec::new();
        loop {
            let uri = format!("/v1/jobs/{}/log?start={start}", job.job);
            let (_, body) = call(&h.router, get(&uri, None)).await;
            let chunk: LogChunk = serde_json::from_slice(&body).unwrap();
            let data = STANDARD.decode(chunk.data).unwrap();
            if data.is_empty() {
                assert_eq!(chunk.next, start);
                break;
            }
            log.extend_from_slice(&data);
            start = chunk.next;
        }
        assert_eq!(log, b"Step 1/1 : FROM scratch\n");

        let (status, _) = call(
            &h.router,
            Request::builder()
                .method("DELETE")
                .uri(format!("/v1/caps/{}", job.job))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&h.router, get(&format!("/v1/jobs/{}/status", job.job), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_cancel_queued_job_over_http() {
        let h = harness().await;
        let (_, body) = call(
            &h.router,
            post_json(
                "/v1/submit",
                Some(&h.submission),
                serde_json::to_string(&request()).unwrap(),
            ),
        )
        .await;
        let ticket: SubmitResponse = serde_json::from_slice(&body).unwrap();
        let (_, body) = call(
            &h.router,
            post_json(&format!("/v1/tickets/{}/job", ticket.ticket), None, String::new()),
        )
        .await;
        let job: TicketJobResponse = serde_json::from_slice(&body).unwrap();

        let cancel = format!("/v1/jobs/{}/cancel", job.job);
        let (status, _) = call(&h.router, post_json(&cancel, None, String::new())).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&h.router, post_json(&cancel, None, String::new())).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&h.router, get(&format!("/v1/jobs/{}/result", job.job), None)).await;
        let result: JobResultResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(result.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_admin_routes() {
        let h = harness().await;
        let pool = h.state.scheduler.pool("linux").unwrap();
        let _reg = pool.register(WorkerInfo::new("w1", 2), Arc::new(EchoWorker));

        let (status, _) = call(&h.router, get("/v1/pools", Some(&h.submission))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, body) = call(&h.router, get("/v1/pools", Some(&h.admin))).await;
        let pools: PoolsResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(pools.pools, vec!["linux".to_string()]);

        let (status, body) = call(&h.router, get("/v1/pools/nope", Some(&h.admin))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.candidates, vec!["linux".to_string()]);

        let (status, _) = call(
            &h.router,
            post_json(
                "/v1/pools/linux/workers/w1/active",
                Some(&h.admin),
                r#"{"active":false}"#.into(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = call(&h.router, get("/v1/pools/linux/workers", Some(&h.admin))).await;
        let workers: WorkersResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(workers.workers.len(), 1);
        assert!(!workers.workers[0].active);

        let (status, body) = call(
            &h.router,
            post_json(
                "/v1/pools/linux/workers/w9/active",
                Some(&h.admin),
                r#"{"active":true}"#.into(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.candidates, vec!["w1".to_string()]);

        let (status, body) = call(&h.router, get("/v1/pools/linux", Some(&h.admin))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("paused"));
    }

    #[tokio::test]
    async fn test_unassignable_listing() {
        let h = harness().await;
        let mut req = request();
        req.action = req
            .action
            .with_push_to(PushTarget::new("team/app:1", "bot", "pw"));
        call(
            &h.router,
            post_json("/v1/submit", Some(&h.submission), serde_json::to_string(&req).unwrap()),
        )
        .await;

        let (_, body) = call(&h.router, get("/v1/pools/linux/unassignable", Some(&h.admin))).await;
        let listing: UnassignableResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(listing.jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let h = harness().await;
        let (status, body) = call(&h.router, get("/metrics", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("buildpool_jobs_running"));
    }
}
