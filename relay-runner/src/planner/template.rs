//! Fixed review pipeline

use async_trait::async_trait;
use relay_core::domain::job::Job;
use relay_core::domain::plan::PlanStep;
use serde_json::json;

use super::{Planner, PlanningError};

/// Emits the standard ticket review pipeline for every job
///
/// ```text
/// jira_fetch ─┬─ prd_parse ──────────────────────┐
///             ├─ figma_export ─┐                 ├─ synthesis ── slack_delivery
///             └─ browser_crawl ┴─ design_compare ┘
/// ```
pub struct TemplatePlanner;

#[async_trait]
impl Planner for TemplatePlanner {
    async fn plan(&self, job: &Job) -> Result<Vec<PlanStep>, PlanningError> {
        Ok(standard_pipeline(&job.subject_id))
    }
}

pub fn standard_pipeline(subject_id: &str) -> Vec<PlanStep> {
    vec![
        PlanStep::new("jira_fetch", "jira")
            .critical()
            .with_label("Fetching Jira ticket...")
            .with_params(json!({ "ticket_id": subject_id })),
        PlanStep::new("prd_parse", "internal")
            .depends_on(["jira_fetch"])
            .with_label("Parsing PRD..."),
        PlanStep::new("figma_export", "figma")
            .depends_on(["jira_fetch"])
            .with_label("Exporting Figma designs..."),
        PlanStep::new("browser_crawl", "browser")
            .depends_on(["jira_fetch"])
            .critical()
            .with_label("Crawling staging app..."),
        PlanStep::new("design_compare", "vision")
            .depends_on(["browser_crawl", "figma_export"])
            .with_label("Comparing designs..."),
        PlanStep::new("synthesis", "synthesis")
            .depends_on(["design_compare", "prd_parse"])
            .with_label("Generating summary..."),
        PlanStep::new("slack_delivery", "slack")
            .depends_on(["synthesis"])
            .with_label("Delivering to Slack..."),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, step)| step.with_order(i as i32 + 1))
    .collect()
}
