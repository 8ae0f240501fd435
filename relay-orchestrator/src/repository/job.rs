//! Job Repository
//!
//! Handles all database operations on the `jobs` table, including the
//! lease columns that make it a work queue.
//!
//! Functions taking a `PgConnection` are meant to run inside a caller-owned
//! transaction.

use relay_core::domain::job::{Job, JobStatus};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

pub const QUEUED_STAGE: &str = "Queued";
pub const CANCELLED_STAGE: &str = "Cancelled";

const JOB_COLUMNS: &str =
    "id, subject_id, status, stage, progress, error, created_at, completed_at";

/// Insert a new job in the `running` state, waiting to be claimed
pub async fn create(conn: &mut PgConnection, subject_id: &str) -> Result<Job, sqlx::Error> {
    let job = Job {
        id: Uuid::new_v4(),
        subject_id: subject_id.to_string(),
        status: JobStatus::Running,
        stage: QUEUED_STAGE.to_string(),
        progress: 0,
        error: None,
        created_at: chrono::Utc::now(),
        completed_at: None,
    };

    sqlx::query(
        r#"
        INSERT INTO jobs (id, subject_id, status, stage, progress, created_at)
        VALUES ($1, $2, $3, $4, 0, $5)
        "#,
    )
    .bind(job.id)
    .bind(&job.subject_id)
    .bind(job.status.as_str())
    .bind(&job.stage)
    .bind(job.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(job)
}

/// Find a job by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List all jobs, newest first
pub async fn list_all(pool: &PgPool) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Lease Management
// =============================================================================

/// Claim the oldest running job whose lease is free or expired
///
/// Concurrent claimers never receive the same job: the candidate row is
/// locked with `SKIP LOCKED` and stamped in the same statement.
pub async fn claim_next(
    pool: &PgPool,
    worker_id: &str,
    lease_seconds: u64,
) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        UPDATE jobs
        SET claimed_by = $1,
            lease_expires_at = NOW() + make_interval(secs => $2)
        WHERE id = (
            SELECT id FROM jobs
            WHERE status = 'running'
              AND (lease_expires_at IS NULL OR lease_expires_at < NOW())
            ORDER BY created_at
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(worker_id)
    .bind(lease_seconds as f64)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Extend the lease of a job the worker still owns
///
/// Returns false when the job is no longer running or owned by someone else.
pub async fn renew_lease(
    pool: &PgPool,
    id: Uuid,
    worker_id: &str,
    lease_seconds: u64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET lease_expires_at = NOW() + make_interval(secs => $3)
        WHERE id = $1 AND status = 'running' AND claimed_by = $2
        "#,
    )
    .bind(id)
    .bind(worker_id)
    .bind(lease_seconds as f64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Drop ownership so the job can be claimed again immediately
pub async fn release(pool: &PgPool, id: Uuid, worker_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET claimed_by = NULL, lease_expires_at = NULL
        WHERE id = $1 AND claimed_by = $2
        "#,
    )
    .bind(id)
    .bind(worker_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Lock the job row if `worker_id` still owns it and it is still running
///
/// Every worker write starts with this fence inside its transaction.
pub async fn lock_owned(
    conn: &mut PgConnection,
    id: Uuid,
    worker_id: &str,
) -> Result<bool, sqlx::Error> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM jobs
        WHERE id = $1 AND status = 'running' AND claimed_by = $2
        FOR UPDATE
        "#,
    )
    .bind(id)
    .bind(worker_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.is_some())
}

// =============================================================================
// Progress and Terminal Transitions
// =============================================================================

/// Update stage and progress; progress never moves backwards
pub async fn update_progress(
    conn: &mut PgConnection,
    id: Uuid,
    stage: &str,
    progress: u8,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET stage = $2, progress = GREATEST(progress, $3)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(stage)
    .bind(i16::from(progress))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Move a job to a terminal status and drop its lease
///
/// A `None` stage keeps the current one.
pub async fn finish(
    conn: &mut PgConnection,
    id: Uuid,
    status: JobStatus,
    error: Option<&str>,
    stage: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = $2,
            error = $3,
            stage = COALESCE($4, stage),
            progress = 100,
            completed_at = NOW(),
            claimed_by = NULL,
            lease_expires_at = NULL
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(error)
    .bind(stage)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Fail a running job on behalf of a user
///
/// Returns false when the job is not running. The lease is kept so the
/// owning worker's next fenced write fails instead of another worker
/// claiming the job.
pub async fn cancel(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'failed',
            stage = $2,
            error = 'job cancelled',
            progress = 100,
            completed_at = NOW()
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(id)
    .bind(CANCELLED_STAGE)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    subject_id: String,
    status: String,
    stage: String,
    progress: i16,
    error: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        let status = row.status.parse().unwrap_or_else(|e| {
            tracing::warn!("Job {}: {}, treating as failed", row.id, e);
            JobStatus::Failed
        });

        Job {
            id: row.id,
            subject_id: row.subject_id,
            status,
            stage: row.stage,
            progress: row.progress.clamp(0, 100) as u8,
            error: row.error,
            created_at: row.created_at,
            completed_at: row.completed_at,
        }
    }
}
