//! Step Repository
//!
//! Executed steps (reality) and their outputs. A retry of a step updates
//! its existing row instead of adding one.

use std::collections::HashMap;

use relay_core::domain::step::{Document, ExecutedStep, StepStatus};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Record that a step has been dispatched
pub async fn mark_running(
    conn: &mut PgConnection,
    job_id: Uuid,
    step_name: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO executed_steps (job_id, step_name, status, error, started_at, updated_at)
        VALUES ($1, $2, 'running', NULL, NOW(), NOW())
        ON CONFLICT (job_id, step_name) DO UPDATE
        SET status = 'running', error = NULL, started_at = NOW(), updated_at = NOW()
        "#,
    )
    .bind(job_id)
    .bind(step_name)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Record a terminal outcome for a step
pub async fn mark_finished(
    conn: &mut PgConnection,
    job_id: Uuid,
    step_name: &str,
    status: StepStatus,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO executed_steps (job_id, step_name, status, error, started_at, updated_at)
        VALUES ($1, $2, $3, $4, NULL, NOW())
        ON CONFLICT (job_id, step_name) DO UPDATE
        SET status = EXCLUDED.status, error = EXCLUDED.error, updated_at = NOW()
        "#,
    )
    .bind(job_id)
    .bind(step_name)
    .bind(status.as_str())
    .bind(error)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Store a step's output document
pub async fn save_output(
    conn: &mut PgConnection,
    job_id: Uuid,
    step_name: &str,
    output: &Document,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO step_outputs (job_id, step_name, output, created_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (job_id, step_name) DO UPDATE
        SET output = EXCLUDED.output, created_at = NOW()
        "#,
    )
    .bind(job_id)
    .bind(step_name)
    .bind(output)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Fail every step still recorded as running
pub async fn fail_running(
    conn: &mut PgConnection,
    job_id: Uuid,
    error: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE executed_steps
        SET status = 'failed', error = $2, updated_at = NOW()
        WHERE job_id = $1 AND status = 'running'
        "#,
    )
    .bind(job_id)
    .bind(error)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Load the reality records of a job
pub async fn find_by_job(pool: &PgPool, job_id: Uuid) -> Result<Vec<ExecutedStep>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ExecutedStepRow>(
        r#"
        SELECT step_name, status, error, started_at, updated_at
        FROM executed_steps
        WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Load every stored output of a job, keyed by step name
pub async fn find_outputs(
    pool: &PgPool,
    job_id: Uuid,
) -> Result<HashMap<String, Document>, sqlx::Error> {
    let rows: Vec<(String, serde_json::Value)> =
        sqlx::query_as("SELECT step_name, output FROM step_outputs WHERE job_id = $1")
            .bind(job_id)
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ExecutedStepRow {
    step_name: String,
    status: String,
    error: Option<String>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<ExecutedStepRow> for ExecutedStep {
    fn from(row: ExecutedStepRow) -> Self {
        let status = row.status.parse().unwrap_or_else(|e| {
            tracing::warn!("Step {}: {}, treating as failed", row.step_name, e);
            StepStatus::Failed
        });

        ExecutedStep {
            step_name: row.step_name,
            status,
            error: row.error,
            started_at: row.started_at,
            updated_at: row.updated_at,
        }
    }
}
