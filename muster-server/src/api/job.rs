//! Job API Handlers
//!
//! HTTP endpoints for running commands and reading back jobs.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use muster_core::domain::job::{Job, Request};
use muster_core::dto::job::{ExecuteResponse, JobQuery};
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

// =============================================================================
// Execution
// =============================================================================

/// POST /execute
/// Run a command and wait for its result
///
/// The dispatch runs on its own task so that a client going away cancels the job
/// instead of abandoning it mid-flight.
pub async fn execute(
    State(state): State<AppState>,
    Json(request): Json<Request>,
) -> ApiResult<Json<ExecuteResponse>> {
    tracing::info!("Executing {} for {}", request.command, request.username);

    let cancel = CancellationToken::new();
    let on_disconnect = cancel.clone().drop_guard();

    let dispatcher = state.dispatcher.clone();
    let dispatched = tokio::spawn(async move { dispatcher.execute(cancel, request).await })
        .await
        .map_err(|e| ApiError::InternalError(format!("dispatch task failed: {}", e)))?;
    on_disconnect.disarm();

    let dispatched = dispatched?;
    Ok(Json(ExecuteResponse {
        job_id: dispatched.job_id,
        output: dispatched.output,
    }))
}

// =============================================================================
// Job Queries
// =============================================================================

/// GET /job/{id}
/// Get job details by ID
pub async fn get_job(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);

    let job = state
        .store
        .find(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", id)))?;

    Ok(Json(job))
}

/// GET /jobs
/// List jobs newest first, optionally filtered by user and limited
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    tracing::debug!("Listing jobs: {:?}", query);

    let jobs = state.store.query(&query).await?;
    Ok(Json(jobs))
}

/// GET /job/{id}/logs
/// Get the output lines of a job
pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Vec<String>>> {
    tracing::debug!("Getting logs for job: {}", id);

    if state.store.find(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Job {} not found", id)));
    }

    let lines = state
        .logs
        .read(id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(lines))
}
