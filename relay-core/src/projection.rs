//! Status projection
//!
//! Intent (declared plan steps) and reality (executed steps) are stored
//! separately and merged only here, at read time. Reality overrides intent
//! once present; a step that was never attempted reports its declared
//! status and carries no error or timestamps.

use std::collections::HashMap;

use crate::domain::job::Job;
use crate::domain::plan::PlanStep;
use crate::domain::step::{ExecutedStep, StepStatus};
use crate::dto::job::{JobStatusView, StepState};
use crate::dto::plan::PlanEntry;

/// Merge intent and reality into one list, ordered by the plan's order hint
pub fn merge_steps(intent: &[PlanStep], reality: &[ExecutedStep]) -> Vec<PlanEntry> {
    let observed: HashMap<&str, &ExecutedStep> = reality
        .iter()
        .map(|r| (r.step_name.as_str(), r))
        .collect();

    let mut ordered: Vec<&PlanStep> = intent.iter().collect();
    ordered.sort_by_key(|s| s.step_order);

    ordered
        .into_iter()
        .map(|step| {
            let seen = observed.get(step.step_name.as_str());
            PlanEntry {
                step_name: step.step_name.clone(),
                step_order: step.step_order,
                agent: step.agent.clone(),
                label: step.label.clone(),
                depends_on: step.depends_on.clone(),
                critical: step.critical,
                status: seen.map(|r| r.status).unwrap_or(step.status),
                error: seen.and_then(|r| r.error.clone()),
                started_at: seen.and_then(|r| r.started_at),
                updated_at: seen.map(|r| r.updated_at),
            }
        })
        .collect()
}

/// Effective status of every step, keyed by name
pub fn effective_statuses(
    intent: &[PlanStep],
    reality: &[ExecutedStep],
) -> HashMap<String, StepStatus> {
    merge_steps(intent, reality)
        .into_iter()
        .map(|e| (e.step_name, e.status))
        .collect()
}

/// The polling view served to clients
pub fn status_view(job: &Job, entries: &[PlanEntry]) -> JobStatusView {
    JobStatusView {
        job_id: job.id,
        subject_id: job.subject_id.clone(),
        stage: job.stage.clone(),
        progress: job.progress,
        status: job.status,
        error: job.error.clone(),
        steps: entries
            .iter()
            .map(|e| StepState {
                step_name: e.step_name.clone(),
                status: e.status,
            })
            .collect(),
    }
}
