//! Worker Service
//!
//! The protocol runners use to own and drive a job: claim, lease renewal,
//! plan persistence, step transitions and the terminal transition.
//!
//! Every write is fenced: it applies only while the job is still running
//! and still claimed by the calling worker.

use relay_core::domain::job::{Job, JobStatus};
use relay_core::domain::plan::{Plan, PlanStep};
use relay_core::domain::step::StepStatus;
use relay_core::dto::worker::{ExecutionState, FinishRequest, StepTransition, TransitionRequest};
use relay_core::{AgentCatalog, PlanError, validate};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::repository::{job_repository, plan_repository, step_repository};

/// Service error type
#[derive(Debug)]
pub enum WorkerError {
    NotFound(Uuid),
    NotOwner { job_id: Uuid, worker_id: String },
    InvalidPlan(PlanError),
    ValidationError(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for WorkerError {
    fn from(err: sqlx::Error) -> Self {
        WorkerError::DatabaseError(err)
    }
}

impl From<PlanError> for WorkerError {
    fn from(err: PlanError) -> Self {
        WorkerError::InvalidPlan(err)
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;

/// Agents are resolved by the runner's registry before a plan is saved;
/// the orchestrator only re-checks the plan's structure.
struct AnyAgent;

impl AgentCatalog for AnyAgent {
    fn has_agent(&self, _agent: &str) -> bool {
        true
    }
}

// =============================================================================
// Leases
// =============================================================================

/// Claim the next job for a worker, if one is waiting
pub async fn claim(pool: &PgPool, worker_id: &str, lease_seconds: u64) -> Result<Option<Job>> {
    validate_worker(worker_id, lease_seconds)?;

    let job = job_repository::claim_next(pool, worker_id, lease_seconds).await?;
    if let Some(job) = &job {
        tracing::info!("Job {} claimed by {}", job.id, worker_id);
    }

    Ok(job)
}

/// Extend the worker's lease on a job
pub async fn renew_lease(pool: &PgPool, job_id: Uuid, worker_id: &str, lease_seconds: u64) -> Result<()> {
    validate_worker(worker_id, lease_seconds)?;

    if !job_repository::renew_lease(pool, job_id, worker_id, lease_seconds).await? {
        return Err(not_owner(pool, job_id, worker_id).await);
    }

    tracing::debug!("Lease on job {} renewed by {}", job_id, worker_id);
    Ok(())
}

/// Give up ownership of a job without finishing it
pub async fn release(pool: &PgPool, job_id: Uuid, worker_id: &str) -> Result<()> {
    if !job_repository::release(pool, job_id, worker_id).await? {
        return Err(not_owner(pool, job_id, worker_id).await);
    }

    tracing::info!("Job {} released by {}", job_id, worker_id);
    Ok(())
}

// =============================================================================
// Execution State
// =============================================================================

/// Everything an executor needs to resume a job
pub async fn execution_state(pool: &PgPool, job_id: Uuid) -> Result<ExecutionState> {
    let job = job_repository::find_by_id(pool, job_id)
        .await?
        .ok_or(WorkerError::NotFound(job_id))?;

    let plan = plan_repository::find_by_job(pool, job_id).await?;
    let executed = step_repository::find_by_job(pool, job_id).await?;
    let outputs = step_repository::find_outputs(pool, job_id).await?;

    Ok(ExecutionState {
        job,
        plan,
        executed,
        outputs,
    })
}

/// Persist a plan for an owned job
///
/// Saving is idempotent: if the job already has a plan (a previous owner
/// stored it before crashing), the stored plan is kept.
pub async fn save_plan(
    pool: &PgPool,
    job_id: Uuid,
    worker_id: &str,
    steps: Vec<PlanStep>,
) -> Result<()> {
    let steps = super::normalize_steps(steps);
    validate(&Plan::new(steps.clone()), &AnyAgent)?;

    let mut tx = pool.begin().await?;
    fence(&mut tx, pool, job_id, worker_id).await?;

    if plan_repository::exists(&mut tx, job_id).await? {
        tx.rollback().await?;
        tracing::debug!("Job {} already has a plan, keeping it", job_id);
        return Ok(());
    }

    plan_repository::insert_steps(&mut tx, job_id, &steps).await?;
    tx.commit().await?;

    tracing::info!("Plan with {} steps saved for job {}", steps.len(), job_id);
    Ok(())
}

// =============================================================================
// Transitions
// =============================================================================

/// Persist one step transition together with the job's stage and progress
///
/// A success stores the step's output in the same transaction, so a step
/// is never `done` without its output.
pub async fn record_transition(pool: &PgPool, job_id: Uuid, req: TransitionRequest) -> Result<()> {
    let step_name = req.transition.step_name().to_string();

    let mut tx = pool.begin().await?;
    fence(&mut tx, pool, job_id, &req.worker_id).await?;

    if !plan_repository::has_step(&mut tx, job_id, &step_name).await? {
        tx.rollback().await?;
        return Err(WorkerError::ValidationError(format!(
            "Job {} has no step named '{}'",
            job_id, step_name
        )));
    }

    match &req.transition {
        StepTransition::Started { .. } => {
            step_repository::mark_running(&mut tx, job_id, &step_name).await?;
        }
        StepTransition::Succeeded { output, .. } => {
            step_repository::mark_finished(&mut tx, job_id, &step_name, StepStatus::Done, None)
                .await?;
            step_repository::save_output(&mut tx, job_id, &step_name, output).await?;
        }
        StepTransition::Failed { error, .. } => {
            step_repository::mark_finished(
                &mut tx,
                job_id,
                &step_name,
                StepStatus::Failed,
                Some(error),
            )
            .await?;
        }
        StepTransition::Skipped { .. } => {
            plan_repository::mark_skipped(&mut tx, job_id, &step_name).await?;
        }
    }

    job_repository::update_progress(&mut tx, job_id, &req.stage, req.progress.min(100)).await?;
    tx.commit().await?;

    tracing::debug!(
        "Job {} step {}: {} ({}%)",
        job_id,
        step_name,
        transition_kind(&req.transition),
        req.progress
    );

    Ok(())
}

/// Move an owned job to its terminal status
pub async fn finish(pool: &PgPool, job_id: Uuid, req: FinishRequest) -> Result<()> {
    if !req.status.is_terminal() {
        return Err(WorkerError::ValidationError(format!(
            "Invalid completion status: {}",
            req.status
        )));
    }

    let mut tx = pool.begin().await?;
    fence(&mut tx, pool, job_id, &req.worker_id).await?;

    if req.status == JobStatus::Failed {
        plan_repository::skip_unattempted(&mut tx, job_id).await?;
    }

    job_repository::finish(
        &mut tx,
        job_id,
        req.status,
        req.error.as_deref(),
        req.stage.as_deref(),
    )
    .await?;
    tx.commit().await?;

    tracing::info!("Job {} finished as {}", job_id, req.status);
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

async fn fence(conn: &mut PgConnection, pool: &PgPool, job_id: Uuid, worker_id: &str) -> Result<()> {
    if job_repository::lock_owned(conn, job_id, worker_id).await? {
        Ok(())
    } else {
        Err(not_owner(pool, job_id, worker_id).await)
    }
}

/// Distinguish a missing job from one the worker does not own
async fn not_owner(pool: &PgPool, job_id: Uuid, worker_id: &str) -> WorkerError {
    match job_repository::find_by_id(pool, job_id).await {
        Ok(Some(_)) => WorkerError::NotOwner {
            job_id,
            worker_id: worker_id.to_string(),
        },
        Ok(None) => WorkerError::NotFound(job_id),
        Err(err) => WorkerError::DatabaseError(err),
    }
}

fn validate_worker(worker_id: &str, lease_seconds: u64) -> Result<()> {
    if worker_id.trim().is_empty() {
        return Err(WorkerError::ValidationError(
            "worker_id cannot be empty".to_string(),
        ));
    }

    if lease_seconds == 0 {
        return Err(WorkerError::ValidationError(
            "lease_seconds must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

fn transition_kind(transition: &StepTransition) -> &'static str {
    match transition {
        StepTransition::Started { .. } => "started",
        StepTransition::Succeeded { .. } => "succeeded",
        StepTransition::Failed { .. } => "failed",
        StepTransition::Skipped { .. } => "skipped",
    }
}
