//! Job Service
//!
//! Business logic behind the public API: submission, status projection,
//! plan inspection, result assembly, cancellation and history.

use std::collections::HashSet;

use relay_core::domain::job::{Job, JobStatus};
use relay_core::domain::plan::Plan;
use relay_core::dto::job::{JobResults, JobStatusView, SubmitJob};
use relay_core::dto::plan::PlanEntry;
use relay_core::projection::{merge_steps, status_view};
use relay_core::{PlanError, validate};
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::{job_repository, plan_repository, step_repository};

/// Service error type
#[derive(Debug)]
pub enum JobError {
    NotFound(Uuid),
    InvalidPlan(PlanError),
    InvalidState(String),
    ValidationError(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::DatabaseError(err)
    }
}

impl From<PlanError> for JobError {
    fn from(err: PlanError) -> Self {
        JobError::InvalidPlan(err)
    }
}

pub type Result<T> = std::result::Result<T, JobError>;

/// Create a job and leave it for a runner to claim
///
/// An explicit plan is validated first; a rejected plan creates nothing.
pub async fn submit(pool: &PgPool, agents: &HashSet<String>, req: SubmitJob) -> Result<Job> {
    let subject_id = req.subject_id.trim();
    if subject_id.is_empty() {
        return Err(JobError::ValidationError(
            "subject_id cannot be empty".to_string(),
        ));
    }

    let steps = match req.plan {
        Some(steps) => {
            let steps = super::normalize_steps(steps);
            validate(&Plan::new(steps.clone()), agents)?;
            Some(steps)
        }
        None => None,
    };

    let mut tx = pool.begin().await?;
    let job = job_repository::create(&mut tx, subject_id).await?;
    if let Some(steps) = &steps {
        plan_repository::insert_steps(&mut tx, job.id, steps).await?;
    }
    tx.commit().await?;

    tracing::info!(
        "Job {} submitted for {} ({})",
        job.id,
        job.subject_id,
        if steps.is_some() { "explicit plan" } else { "runner plans" }
    );

    Ok(job)
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, id: Uuid) -> Result<Job> {
    job_repository::find_by_id(pool, id)
        .await?
        .ok_or(JobError::NotFound(id))
}

/// Merge the job row, declared steps and executed steps into one view
pub async fn get_status(pool: &PgPool, id: Uuid) -> Result<JobStatusView> {
    let job = get_job(pool, id).await?;
    let entries = get_merged_plan(pool, id).await?;

    Ok(status_view(&job, &entries))
}

/// Ordered plan with per-step status and error detail
pub async fn get_plan(pool: &PgPool, id: Uuid) -> Result<Vec<PlanEntry>> {
    get_job(pool, id).await?;
    get_merged_plan(pool, id).await
}

async fn get_merged_plan(pool: &PgPool, id: Uuid) -> Result<Vec<PlanEntry>> {
    let intent = plan_repository::find_by_job(pool, id).await?;
    let reality = step_repository::find_by_job(pool, id).await?;

    Ok(merge_steps(&intent, &reality))
}

/// Assemble the outputs of a completed job
pub async fn get_results(pool: &PgPool, id: Uuid) -> Result<JobResults> {
    let job = get_job(pool, id).await?;

    if job.status != JobStatus::Completed {
        return Err(JobError::InvalidState(format!(
            "Job {} is {}, results are only available once it has completed",
            id, job.status
        )));
    }

    let outputs = step_repository::find_outputs(pool, id).await?;

    Ok(JobResults {
        job_id: job.id,
        subject_id: job.subject_id,
        completed_at: job.completed_at,
        outputs,
    })
}

/// Cancel a running job
///
/// The job fails, never-attempted steps are declared skipped and in-flight
/// steps are recorded failed, all in one transaction.
pub async fn cancel(pool: &PgPool, id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await?;

    if !job_repository::cancel(&mut tx, id).await? {
        tx.rollback().await?;
        let job = get_job(pool, id).await?;
        return Err(JobError::InvalidState(format!(
            "Cannot cancel job {} in state {}",
            id, job.status
        )));
    }

    let skipped = plan_repository::skip_unattempted(&mut tx, id).await?;
    let interrupted = step_repository::fail_running(&mut tx, id, "job cancelled").await?;
    tx.commit().await?;

    tracing::info!(
        "Job {} cancelled ({} steps skipped, {} interrupted)",
        id,
        skipped,
        interrupted
    );

    Ok(())
}

/// List all jobs, newest first
pub async fn list_jobs(pool: &PgPool) -> Result<Vec<Job>> {
    let jobs = job_repository::list_all(pool).await?;
    Ok(jobs)
}
