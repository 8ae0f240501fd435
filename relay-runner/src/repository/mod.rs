//! Repository layer
//!
//! The executor's view of the plan store. Implementations persist each
//! transition durably before returning; a rejected write leaves the step in
//! its previously recorded state.

mod http;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use relay_core::InfrastructureError;
use relay_core::domain::job::JobStatus;
use relay_core::domain::plan::PlanStep;
use relay_core::dto::worker::{ExecutionState, StepTransition};
use uuid::Uuid;

pub use http::HttpJobRepository;

pub type Result<T> = std::result::Result<T, InfrastructureError>;

/// Plan store operations needed to drive one job
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Job row, declared plan, executed steps and stored outputs
    async fn execution_state(&self, job_id: Uuid) -> Result<ExecutionState>;

    /// Store a validated plan; keeps an existing plan untouched
    async fn save_plan(&self, job_id: Uuid, steps: Vec<PlanStep>) -> Result<()>;

    /// Persist one step transition with the job's new stage and progress
    async fn record_transition(
        &self,
        job_id: Uuid,
        transition: StepTransition,
        stage: &str,
        progress: u8,
    ) -> Result<()>;

    /// Move the job to a terminal status
    async fn finish(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<String>,
        stage: Option<String>,
    ) -> Result<()>;
}
