//! Submission, ticket and job handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use tracing::info;

use buildpool_core::api::{
    JobResultResponse, JobStatusResponse, LogChunk, SubmitResponse, TicketJobResponse,
};
use buildpool_core::{CapId, JobRequest};

use crate::caps::Capability;
use crate::error::SchedulerError;
use crate::http::Bearer;
use crate::job::Job;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub start: u64,
}

async fn live_job(state: &AppState, id: String) -> Result<Arc<Job>, SchedulerError> {
    state.caps.live(&CapId::new(id)).await?.into_job()
}

/// Admit a build and hand back a ticket.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
    Json(request): Json<JobRequest>,
) -> Result<Json<SubmitResponse>, SchedulerError> {
    let submission = state.caps.resolve_token(&token).await?.into_submission()?;
    let ticket = submission.submit(request)?;
    let job_id = ticket.job().id().clone();
    let ticket = state.caps.insert_live(Capability::Ticket(ticket)).await;
    info!(job_id = %job_id, ticket = %ticket, "Submission accepted");
    Ok(Json(SubmitResponse { ticket }))
}

/// Exchange a ticket for its job handle.
pub async fn redeem_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TicketJobResponse>, SchedulerError> {
    let job = state.caps.redeem_ticket(&CapId::new(id)).await?;
    Ok(Json(TicketJobResponse { job }))
}

/// Read the job log from `start`. Waits until there is something to return.
pub async fn job_log(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Json<LogChunk>, SchedulerError> {
    let job = live_job(&state, id).await?;
    let (data, next) = job.log(query.start).await;
    Ok(Json(LogChunk {
        data: STANDARD.encode(data),
        next,
    }))
}

/// Wait for the job to finish.
pub async fn job_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResultResponse>, SchedulerError> {
    let job = live_job(&state, id).await?;
    let outcome = job.result().await;
    Ok(Json(JobResultResponse::new(job.status(), outcome)))
}

pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, SchedulerError> {
    let job = live_job(&state, id).await?;
    Ok(Json(JobStatusResponse {
        status: job.status(),
        worker: job.worker(),
    }))
}

/// Cancel the job. Repeated calls are harmless.
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, SchedulerError> {
    let job = live_job(&state, id).await?;
    job.cancel();
    Ok(Json(JobStatusResponse {
        status: job.status(),
        worker: job.worker(),
    }))
}

/// Revoke a ticket or job handle.
pub async fn release_cap(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, SchedulerError> {
    if state.caps.release(&CapId::new(id)).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(SchedulerError::UnknownCapability)
    }
}
