//! Job API Handlers
//!
//! Public HTTP endpoints: submission, polling, plan inspection, results,
//! cancellation and history.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use relay_core::dto::job::{JobResults, JobStatusView, JobSummary, SubmitJob, SubmitResponse};
use relay_core::dto::plan::PlanEntry;
use sqlx::PgPool;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::job_service::{self, JobError};

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => ApiError::NotFound(format!("Job {} not found", id)),
            JobError::InvalidPlan(err) => ApiError::BadRequest(format!("Invalid plan: {}", err)),
            JobError::ValidationError(msg) => ApiError::BadRequest(msg),
            JobError::InvalidState(msg) => ApiError::Conflict(msg),
            JobError::DatabaseError(err) => ApiError::DatabaseError(err),
        }
    }
}

/// POST /run
/// Queue a new job and return immediately
pub async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJob>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    tracing::info!("Submitting job for subject: {}", req.subject_id);

    let job = job_service::submit(&state.pool, &state.agents, req).await?;

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id: job.id })))
}

/// GET /status/{id}
/// Merged job and step status for polling clients
pub async fn get_status(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatusView>> {
    tracing::debug!("Getting status of job: {}", id);

    let view = job_service::get_status(&pool, id).await?;

    Ok(Json(view))
}

/// GET /plan/{id}
/// Ordered plan with per-step status and error detail
pub async fn get_plan(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<PlanEntry>>> {
    tracing::debug!("Getting plan of job: {}", id);

    let plan = job_service::get_plan(&pool, id).await?;

    Ok(Json(plan))
}

/// GET /results/{id}
/// Assembled step outputs of a completed job
pub async fn get_results(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobResults>> {
    tracing::debug!("Getting results of job: {}", id);

    let results = job_service::get_results(&pool, id).await?;

    Ok(Json(results))
}

/// POST /job/{id}/cancel
/// Fail a running job and skip its remaining steps
pub async fn cancel_job(State(pool): State<PgPool>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    tracing::info!("Cancelling job: {}", id);

    job_service::cancel(&pool, id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /jobs
/// Job history, newest first
pub async fn list_jobs(State(pool): State<PgPool>) -> ApiResult<Json<Vec<JobSummary>>> {
    tracing::debug!("Listing all jobs");

    let jobs = job_service::list_jobs(&pool).await?;

    Ok(Json(jobs.into_iter().map(JobSummary::from).collect()))
}
