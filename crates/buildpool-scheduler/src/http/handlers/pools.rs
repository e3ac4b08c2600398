//! Pool administration handlers. All require the admin capability.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

use buildpool_core::api::{
    PoolsResponse, SelfUpdateResponse, SetActiveRequest, UnassignableResponse, WorkersResponse,
};

use crate::error::SchedulerError;
use crate::http::Bearer;
use crate::scheduler::Scheduler;
use crate::state::AppState;

async fn admin(state: &AppState, token: &str) -> Result<Arc<Scheduler>, SchedulerError> {
    state.caps.resolve_token(token).await?.into_admin()
}

pub async fn list_pools(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
) -> Result<Json<PoolsResponse>, SchedulerError> {
    let scheduler = admin(&state, &token).await?;
    Ok(Json(PoolsResponse {
        pools: scheduler.pool_names(),
    }))
}

/// Human-readable pool status.
pub async fn dump_pool(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
    Path(pool): Path<String>,
) -> Result<impl IntoResponse, SchedulerError> {
    let pool = admin(&state, &token).await?.pool(&pool)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], pool.dump()))
}

pub async fn list_workers(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
    Path(pool): Path<String>,
) -> Result<Json<WorkersResponse>, SchedulerError> {
    let pool = admin(&state, &token).await?.pool(&pool)?;
    Ok(Json(WorkersResponse {
        workers: pool.workers(),
    }))
}

/// Pause or resume a worker.
pub async fn set_worker_active(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
    Path((pool, worker)): Path<(String, String)>,
    Json(body): Json<SetActiveRequest>,
) -> Result<StatusCode, SchedulerError> {
    let pool = admin(&state, &token).await?.pool(&pool)?;
    pool.set_active(&worker, body.active)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Ask a worker to update itself once drained.
pub async fn update_worker(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
    Path((pool, worker)): Path<(String, String)>,
) -> Result<Json<SelfUpdateResponse>, SchedulerError> {
    let pool = admin(&state, &token).await?.pool(&pool)?;
    let scheduled = pool.self_update(&worker)?;
    Ok(Json(SelfUpdateResponse { scheduled }))
}

/// Queued jobs no connected worker may push for.
pub async fn list_unassignable(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
    Path(pool): Path<String>,
) -> Result<Json<UnassignableResponse>, SchedulerError> {
    let pool = admin(&state, &token).await?.pool(&pool)?;
    Ok(Json(UnassignableResponse {
        jobs: pool
            .unassignable()
            .into_iter()
            .map(|id| id.into_inner())
            .collect(),
    }))
}
