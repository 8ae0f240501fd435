use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Jobs double as the work queue; claimed_by/lease_expires_at hold the lease
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            subject_id VARCHAR(255) NOT NULL,
            status VARCHAR(20) NOT NULL,
            stage TEXT NOT NULL DEFAULT '',
            progress SMALLINT NOT NULL DEFAULT 0,
            error TEXT,
            claimed_by VARCHAR(255),
            lease_expires_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            completed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Intent: what the planner declared
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS plan_steps (
            job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            step_name VARCHAR(255) NOT NULL,
            step_order INTEGER NOT NULL,
            agent VARCHAR(255) NOT NULL,
            label TEXT,
            params JSONB NOT NULL DEFAULT '{}',
            depends_on TEXT[] NOT NULL DEFAULT '{}',
            critical BOOLEAN NOT NULL DEFAULT FALSE,
            timeout_seconds BIGINT,
            status VARCHAR(20) NOT NULL DEFAULT 'pending',
            PRIMARY KEY (job_id, step_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Reality: what the executor actually attempted
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS executed_steps (
            job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            step_name VARCHAR(255) NOT NULL,
            status VARCHAR(20) NOT NULL,
            error TEXT,
            started_at TIMESTAMPTZ,
            updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (job_id, step_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS step_outputs (
            job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            step_name VARCHAR(255) NOT NULL,
            output JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (job_id, step_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Claim queries scan running jobs oldest first
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at DESC)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
