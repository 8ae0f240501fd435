//! Job command handlers
//!
//! Handles submitting jobs and inspecting their status, plan and results.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::*;
use relay_client::OrchestratorClient;
use relay_core::domain::job::JobStatus;
use relay_core::domain::plan::PlanStep;
use relay_core::domain::step::StepStatus;
use relay_core::dto::job::{JobStatusView, SubmitJob};
use relay_core::dto::plan::PlanEntry;

use super::FOLLOW_INTERVAL;
use crate::id_resolver::resolve_job_id;

/// Submit a job, optionally with an explicit plan
pub async fn run(
    client: &OrchestratorClient,
    subject_id: String,
    plan_file: Option<PathBuf>,
    follow: bool,
) -> Result<()> {
    let plan = match plan_file {
        Some(path) => Some(read_plan(&path)?),
        None => None,
    };

    let submitted = client
        .submit(SubmitJob { subject_id, plan })
        .await
        .context("Failed to submit job")?;

    println!("{}", "✓ Job submitted".green().bold());
    println!("  ID: {}", submitted.job_id.to_string().cyan());

    if follow {
        println!();
        follow_status(client, submitted.job_id).await?;
    }

    Ok(())
}

fn read_plan(path: &PathBuf) -> Result<Vec<PlanStep>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Plan file {} is not a JSON array of steps", path.display()))
}

/// Show the polling view of a job
pub async fn status(client: &OrchestratorClient, id: &str, follow: bool) -> Result<()> {
    let job_id = resolve_job_id(client, id).await?;

    if follow {
        return follow_status(client, job_id).await;
    }

    let view = client.get_status(job_id).await?;
    print_status(&view);
    Ok(())
}

/// Poll every few seconds until the job leaves `running`
async fn follow_status(client: &OrchestratorClient, job_id: uuid::Uuid) -> Result<()> {
    let mut last_stage = String::new();

    loop {
        let view = client.get_status(job_id).await?;

        if view.stage != last_stage {
            println!(
                "{} {} {}",
                format!("[{:>3}%]", view.progress).dimmed(),
                colorize_status(view.status),
                view.stage
            );
            last_stage = view.stage.clone();
        }

        if view.status.is_terminal() {
            println!();
            print_status(&view);
            return Ok(());
        }

        tokio::time::sleep(FOLLOW_INTERVAL).await;
    }
}

/// Show the declared plan with effective statuses
pub async fn plan(client: &OrchestratorClient, id: &str) -> Result<()> {
    let job_id = resolve_job_id(client, id).await?;
    let entries = client.get_plan(job_id).await?;

    if entries.is_empty() {
        println!("{}", "Job has not been planned yet.".yellow());
        return Ok(());
    }

    println!("{}", format!("Plan of job {}:", job_id).bold());
    println!();
    for entry in &entries {
        print_plan_entry(entry);
    }

    Ok(())
}

/// Show the outputs of a completed job
pub async fn results(client: &OrchestratorClient, id: &str) -> Result<()> {
    let job_id = resolve_job_id(client, id).await?;

    let results = match client.get_results(job_id).await {
        Ok(results) => results,
        Err(e) if e.is_conflict() => {
            println!("{}", format!("⚠ {}", e).yellow());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", format!("Results of job {} ({})", job_id, results.subject_id).bold());
    if let Some(completed) = results.completed_at {
        println!("  Completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }

    let mut names: Vec<&String> = results.outputs.keys().collect();
    names.sort();

    for name in names {
        println!("\n{}", name.cyan().bold());
        let pretty = serde_json::to_string_pretty(&results.outputs[name])
            .unwrap_or_else(|_| results.outputs[name].to_string());
        println!("{}", pretty);
    }

    Ok(())
}

pub async fn cancel(client: &OrchestratorClient, id: &str) -> Result<()> {
    let job_id = resolve_job_id(client, id).await?;

    client
        .cancel(job_id)
        .await
        .with_context(|| format!("Failed to cancel job {}", job_id))?;

    println!("{}", format!("✓ Job {} cancelled", job_id).green());
    Ok(())
}

/// List all jobs
pub async fn list(client: &OrchestratorClient) -> Result<()> {
    let jobs = client.list_jobs().await?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} job(s):", jobs.len()).bold());
    println!();
    for job in jobs {
        println!("  {} Job {}", "▸".cyan(), job.id.to_string().dimmed());
        println!("    Subject:  {}", job.subject_id);
        println!(
            "    Status:   {} ({}%)",
            colorize_status(job.status),
            job.progress
        );
        println!(
            "    Created:  {}",
            job.created_at
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
                .dimmed()
        );
        println!();
    }

    Ok(())
}

fn print_status(view: &JobStatusView) {
    println!("{}", "Job Status:".bold());
    println!("  ID:       {}", view.job_id.to_string().cyan());
    println!("  Subject:  {}", view.subject_id);
    println!("  Status:   {}", colorize_status(view.status));
    println!("  Stage:    {}", view.stage);
    println!("  Progress: {}%", view.progress);

    if let Some(error) = &view.error {
        println!("  Error:    {}", error.red());
    }

    if !view.steps.is_empty() {
        println!("\n{}", "Steps:".bold());
        for step in &view.steps {
            println!("  {} {}", colorize_step(step.status), step.step_name);
        }
    }
}

fn print_plan_entry(entry: &PlanEntry) {
    let critical = if entry.critical { " (critical)".red().to_string() } else { String::new() };

    println!(
        "  {:>2}. {} {} [{}]{}",
        entry.step_order,
        colorize_step(entry.status),
        entry.step_name.bold(),
        entry.agent.dimmed(),
        critical
    );
    if !entry.depends_on.is_empty() {
        println!("      after: {}", entry.depends_on.join(", ").dimmed());
    }
    if let Some(error) = &entry.error {
        println!("      error: {}", error.red());
    }
}

/// Colorize job status for display
fn colorize_status(status: JobStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        JobStatus::Running => label.cyan(),
        JobStatus::Completed => label.green(),
        JobStatus::Failed => label.red(),
    }
}

fn colorize_step(status: StepStatus) -> ColoredString {
    let label = format!("{:<7}", status.as_str());
    match status {
        StepStatus::Pending => label.dimmed(),
        StepStatus::Running => label.cyan(),
        StepStatus::Done => label.green(),
        StepStatus::Failed => label.red(),
        StepStatus::Skipped => label.yellow(),
    }
}
