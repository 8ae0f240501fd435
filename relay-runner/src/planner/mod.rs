//! Planners
//!
//! A planner turns a freshly claimed job into a list of plan steps. It runs
//! once per job; the executor validates and stores its output before any
//! step is dispatched.

mod llm;
mod template;

use async_trait::async_trait;
use relay_core::domain::job::Job;
use relay_core::domain::plan::PlanStep;

pub use llm::HttpPlanner;
pub use template::TemplatePlanner;

#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("planner unavailable: {0}")]
    Unavailable(String),

    #[error("planner returned a malformed plan: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, job: &Job) -> Result<Vec<PlanStep>, PlanningError>;
}
