//! HTTP client for the daemon's REST endpoints.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use buildpool_core::api::{
    ErrorResponse, JobResultResponse, JobStatusResponse, LogChunk, PoolsResponse,
    SelfUpdateResponse, SetActiveRequest, SubmitResponse, TicketJobResponse,
    UnassignableResponse, WorkersResponse,
};
use buildpool_core::{CapId, JobOutcome, JobRequest, WorkerSummary};
use buildpool_scheduler::{Service, SturdyRef};

use crate::error::ClientError;

/// Client bound to one daemon and one sturdy capability.
#[derive(Debug, Clone)]
pub struct BuildpoolClient {
    inner: reqwest::Client,
    base_url: String,
    token: String,
    service: Option<Service>,
}

impl BuildpoolClient {
    /// Create a client for `base_url` presenting `token`.
    pub fn new(base_url: &str, token: impl Into<String>) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            service: None,
        }
    }

    /// Create a client from a capability file.
    pub fn from_cap_file(path: &Path) -> Result<Self, ClientError> {
        let sturdy = SturdyRef::load(path)?;
        debug!(path = %path.display(), service = ?sturdy.service, url = %sturdy.url, "Loaded capability");
        let mut client = Self::new(&sturdy.url, sturdy.token);
        client.service = Some(sturdy.service);
        Ok(client)
    }

    /// The service the capability file grants, if loaded from one.
    pub fn service(&self) -> Option<Service> {
        self.service
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let url = self.url(path);
        debug!(url = %url, "GET request");
        self.inner.get(url).bearer_auth(&self.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let url = self.url(path);
        debug!(url = %url, "POST request");
        self.inner.post(url).bearer_auth(&self.token)
    }

    /// Turn a non-success response into [`ClientError::Api`].
    async fn check(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let (message, candidates) = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => (err.error, err.candidates),
            Err(_) if body.is_empty() => (status.to_string(), Vec::new()),
            Err(_) => (body, Vec::new()),
        };
        Err(ClientError::Api {
            status,
            message,
            candidates,
        })
    }

    async fn json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
        let response = Self::check(request.send().await?).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Serialization(e.to_string()))
    }

    /// Check if the daemon is up.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let response = self.inner.get(self.url("/health")).send().await?;
        Ok(response.status().is_success())
    }

    // Submission and jobs

    /// Submit a build. Returns the ticket.
    pub async fn submit(&self, request: &JobRequest) -> Result<CapId, ClientError> {
        let response: SubmitResponse = Self::json(self.post("/v1/submit").json(request)).await?;
        Ok(response.ticket)
    }

    /// Exchange a ticket for its job handle.
    pub async fn redeem(&self, ticket: &CapId) -> Result<CapId, ClientError> {
        let response: TicketJobResponse =
            Self::json(self.post(&format!("/v1/tickets/{ticket}/job"))).await?;
        Ok(response.job)
    }

    /// Submit and redeem in one go.
    pub async fn submit_job(&self, request: &JobRequest) -> Result<CapId, ClientError> {
        let ticket = self.submit(request).await?;
        let job = self.redeem(&ticket).await?;
        // The ticket has no further use once redeemed.
        if let Err(e) = self.release(&ticket).await {
            debug!(ticket = %ticket, error = %e, "Ticket release failed");
        }
        Ok(job)
    }

    /// Read log bytes from `start`. An empty chunk means the log is complete.
    pub async fn log(&self, job: &CapId, start: u64) -> Result<(Vec<u8>, u64), ClientError> {
        let chunk: LogChunk = Self::json(
            self.get(&format!("/v1/jobs/{job}/log"))
                .query(&[("start", start)]),
        )
        .await?;
        let data = STANDARD
            .decode(chunk.data)
            .map_err(|e| ClientError::Serialization(e.to_string()))?;
        Ok((data, chunk.next))
    }

    /// Wait for the job to finish.
    pub async fn result(&self, job: &CapId) -> Result<JobOutcome, ClientError> {
        let response: JobResultResponse =
            Self::json(self.get(&format!("/v1/jobs/{job}/result"))).await?;
        Ok(response.into_outcome())
    }

    pub async fn status(&self, job: &CapId) -> Result<JobStatusResponse, ClientError> {
        Self::json(self.get(&format!("/v1/jobs/{job}/status"))).await
    }

    pub async fn cancel(&self, job: &CapId) -> Result<JobStatusResponse, ClientError> {
        Self::json(self.post(&format!("/v1/jobs/{job}/cancel"))).await
    }

    /// Drop a ticket or job handle on the daemon.
    pub async fn release(&self, id: &CapId) -> Result<(), ClientError> {
        let url = self.url(&format!("/v1/caps/{id}"));
        let response = self.inner.delete(url).bearer_auth(&self.token).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    // Administration

    pub async fn pools(&self) -> Result<Vec<String>, ClientError> {
        let response: PoolsResponse = Self::json(self.get("/v1/pools")).await?;
        Ok(response.pools)
    }

    /// Human-readable pool status.
    pub async fn dump(&self, pool: &str) -> Result<String, ClientError> {
        let response = Self::check(self.get(&format!("/v1/pools/{pool}")).send().await?).await?;
        Ok(response.text().await?)
    }

    pub async fn workers(&self, pool: &str) -> Result<Vec<WorkerSummary>, ClientError> {
        let response: WorkersResponse =
            Self::json(self.get(&format!("/v1/pools/{pool}/workers"))).await?;
        Ok(response.workers)
    }

    /// Pause (`false`) or resume (`true`) a worker.
    pub async fn set_active(&self, pool: &str, worker: &str, active: bool) -> Result<(), ClientError> {
        let request = self
            .post(&format!("/v1/pools/{pool}/workers/{worker}/active"))
            .json(&SetActiveRequest { active });
        Self::check(request.send().await?).await?;
        Ok(())
    }

    /// Ask a worker to update itself. Returns whether the update was scheduled.
    pub async fn self_update(&self, pool: &str, worker: &str) -> Result<bool, ClientError> {
        let response: SelfUpdateResponse =
            Self::json(self.post(&format!("/v1/pools/{pool}/workers/{worker}/update"))).await?;
        Ok(response.scheduled)
    }

    /// Queued jobs no connected worker may push for.
    pub async fn unassignable(&self, pool: &str) -> Result<Vec<String>, ClientError> {
        let response: UnassignableResponse =
            Self::json(self.get(&format!("/v1/pools/{pool}/unassignable"))).await?;
        Ok(response.jobs)
    }
}
