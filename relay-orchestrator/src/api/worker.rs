//! Worker API Handlers
//!
//! Endpoints runners use to claim and drive jobs. Writes from a worker that
//! no longer owns the job are answered with 409.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use relay_core::dto::worker::{
    ExecutionState, FinishRequest, LeaseRequest, ReleaseRequest, SavePlanRequest,
    TransitionRequest,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::service::worker_service::{self, WorkerError};

impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::NotFound(id) => ApiError::NotFound(format!("Job {} not found", id)),
            WorkerError::NotOwner { job_id, worker_id } => ApiError::Conflict(format!(
                "Job {} is not running under worker {}",
                job_id, worker_id
            )),
            WorkerError::InvalidPlan(err) => ApiError::BadRequest(format!("Invalid plan: {}", err)),
            WorkerError::ValidationError(msg) => ApiError::BadRequest(msg),
            WorkerError::DatabaseError(err) => ApiError::DatabaseError(err),
        }
    }
}

/// POST /worker/claim
/// Claim the next job; 204 when the queue is empty
pub async fn claim_job(
    State(pool): State<PgPool>,
    Json(req): Json<LeaseRequest>,
) -> ApiResult<Response> {
    let job = worker_service::claim(&pool, &req.worker_id, req.lease_seconds).await?;

    Ok(match job {
        Some(job) => Json(job).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// POST /worker/jobs/{id}/lease
/// Extend the caller's lease
pub async fn renew_lease(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
    Json(req): Json<LeaseRequest>,
) -> ApiResult<StatusCode> {
    worker_service::renew_lease(&pool, id, &req.worker_id, req.lease_seconds).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /worker/jobs/{id}/release
/// Hand a job back to the queue
pub async fn release_job(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReleaseRequest>,
) -> ApiResult<StatusCode> {
    worker_service::release(&pool, id, &req.worker_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /worker/jobs/{id}/state
/// Job row, declared plan, executed steps and outputs
pub async fn execution_state(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExecutionState>> {
    let state = worker_service::execution_state(&pool, id).await?;

    Ok(Json(state))
}

/// PUT /worker/jobs/{id}/plan
/// Store the planner's output
pub async fn save_plan(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
    Json(req): Json<SavePlanRequest>,
) -> ApiResult<StatusCode> {
    tracing::info!("Worker {} saving plan for job {}", req.worker_id, id);

    worker_service::save_plan(&pool, id, &req.worker_id, req.steps).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /worker/jobs/{id}/transitions
/// Persist one step transition
pub async fn record_transition(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
    Json(req): Json<TransitionRequest>,
) -> ApiResult<StatusCode> {
    worker_service::record_transition(&pool, id, req).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /worker/jobs/{id}/finish
/// Move the job to its terminal status
pub async fn finish_job(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
    Json(req): Json<FinishRequest>,
) -> ApiResult<StatusCode> {
    worker_service::finish(&pool, id, req).await?;

    Ok(StatusCode::NO_CONTENT)
}
