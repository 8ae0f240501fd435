//! Plan Repository
//!
//! Declared plan steps (intent). Rows are written once per job; afterwards
//! only their status may change, and only from `pending` to `skipped`.

use relay_core::domain::plan::PlanStep;
use relay_core::domain::step::StepStatus;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Insert every step of a validated plan
pub async fn insert_steps(
    conn: &mut PgConnection,
    job_id: Uuid,
    steps: &[PlanStep],
) -> Result<(), sqlx::Error> {
    for step in steps {
        sqlx::query(
            r#"
            INSERT INTO plan_steps
                (job_id, step_name, step_order, agent, label, params,
                 depends_on, critical, timeout_seconds, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job_id)
        .bind(&step.step_name)
        .bind(step.step_order)
        .bind(&step.agent)
        .bind(&step.label)
        .bind(&step.params)
        .bind(&step.depends_on)
        .bind(step.critical)
        .bind(timeout_column(step.timeout_seconds))
        .bind(StepStatus::Pending.as_str())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Validated plans stay within `BIGINT`; anything larger saturates instead of wrapping
fn timeout_column(seconds: Option<u64>) -> Option<i64> {
    seconds.map(|t| i64::try_from(t).unwrap_or(i64::MAX))
}

/// Whether a plan has already been stored for the job
pub async fn exists(conn: &mut PgConnection, job_id: Uuid) -> Result<bool, sqlx::Error> {
    let found: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM plan_steps WHERE job_id = $1 LIMIT 1")
        .bind(job_id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(found.is_some())
}

/// Whether the job's plan declares a step with this name
pub async fn has_step(
    conn: &mut PgConnection,
    job_id: Uuid,
    step_name: &str,
) -> Result<bool, sqlx::Error> {
    let found: Option<(i32,)> =
        sqlx::query_as("SELECT 1 FROM plan_steps WHERE job_id = $1 AND step_name = $2")
            .bind(job_id)
            .bind(step_name)
            .fetch_optional(&mut *conn)
            .await?;

    Ok(found.is_some())
}

/// Load the declared plan of a job in order
pub async fn find_by_job(pool: &PgPool, job_id: Uuid) -> Result<Vec<PlanStep>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PlanStepRow>(
        r#"
        SELECT step_name, step_order, agent, label, params, depends_on,
               critical, timeout_seconds, status
        FROM plan_steps
        WHERE job_id = $1
        ORDER BY step_order, step_name
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Declare a never-attempted step skipped
pub async fn mark_skipped(
    conn: &mut PgConnection,
    job_id: Uuid,
    step_name: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE plan_steps SET status = 'skipped'
        WHERE job_id = $1 AND step_name = $2 AND status = 'pending'
        "#,
    )
    .bind(job_id)
    .bind(step_name)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Declare every step without a reality record skipped
pub async fn skip_unattempted(conn: &mut PgConnection, job_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE plan_steps p SET status = 'skipped'
        WHERE p.job_id = $1
          AND p.status = 'pending'
          AND NOT EXISTS (
              SELECT 1 FROM executed_steps e
              WHERE e.job_id = p.job_id AND e.step_name = p.step_name
          )
        "#,
    )
    .bind(job_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PlanStepRow {
    step_name: String,
    step_order: i32,
    agent: String,
    label: Option<String>,
    params: serde_json::Value,
    depends_on: Vec<String>,
    critical: bool,
    timeout_seconds: Option<i64>,
    status: String,
}

impl From<PlanStepRow> for PlanStep {
    fn from(row: PlanStepRow) -> Self {
        PlanStep {
            status: row.status.parse().unwrap_or_default(),
            step_name: row.step_name,
            step_order: row.step_order,
            agent: row.agent,
            label: row.label,
            params: row.params,
            depends_on: row.depends_on,
            critical: row.critical,
            timeout_seconds: row.timeout_seconds.and_then(|t| u64::try_from(t).ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion() {
        let row = PlanStepRow {
            step_name: "design_compare".to_string(),
            step_order: 4,
            agent: "vision".to_string(),
            label: Some("Comparing designs...".to_string()),
            params: serde_json::json!({ "threshold": 0.8 }),
            depends_on: vec!["browser_crawl".to_string(), "figma_export".to_string()],
            critical: false,
            timeout_seconds: Some(120),
            status: "skipped".to_string(),
        };

        let step: PlanStep = row.into();
        assert_eq!(step.status, StepStatus::Skipped);
        assert_eq!(step.timeout_seconds, Some(120));
        assert_eq!(step.depends_on.len(), 2);
        assert_eq!(step.display_label(), "Comparing designs...");
    }

    #[test]
    fn test_timeout_column_never_wraps() {
        assert_eq!(timeout_column(None), None);
        assert_eq!(timeout_column(Some(600)), Some(600));
        assert_eq!(timeout_column(Some(u64::MAX)), Some(i64::MAX));
    }

    #[test]
    fn test_row_conversion_rejects_negative_timeout() {
        let row = PlanStepRow {
            step_name: "a".to_string(),
            step_order: 0,
            agent: "internal".to_string(),
            label: None,
            params: serde_json::json!({}),
            depends_on: vec![],
            critical: true,
            timeout_seconds: Some(-5),
            status: "pending".to_string(),
        };

        let step: PlanStep = row.into();
        assert_eq!(step.timeout_seconds, None);
        assert_eq!(step.status, StepStatus::Pending);
    }
}
