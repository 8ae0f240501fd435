//! Plan store reached through the orchestrator's worker API

use std::sync::Arc;

use async_trait::async_trait;
use relay_client::OrchestratorClient;
use relay_core::domain::job::JobStatus;
use relay_core::domain::plan::PlanStep;
use relay_core::dto::worker::{ExecutionState, FinishRequest, StepTransition, TransitionRequest};
use uuid::Uuid;

use super::{JobRepository, Result};

/// Worker-API implementation of `JobRepository`
///
/// Every write carries this runner's id; the orchestrator rejects it with a
/// conflict once the runner no longer owns the job.
pub struct HttpJobRepository {
    client: Arc<OrchestratorClient>,
    worker_id: String,
}

impl HttpJobRepository {
    pub fn new(client: Arc<OrchestratorClient>, worker_id: String) -> Self {
        Self { client, worker_id }
    }
}

#[async_trait]
impl JobRepository for HttpJobRepository {
    async fn execution_state(&self, job_id: Uuid) -> Result<ExecutionState> {
        Ok(self.client.execution_state(job_id).await?)
    }

    async fn save_plan(&self, job_id: Uuid, steps: Vec<PlanStep>) -> Result<()> {
        Ok(self.client.save_plan(job_id, &self.worker_id, steps).await?)
    }

    async fn record_transition(
        &self,
        job_id: Uuid,
        transition: StepTransition,
        stage: &str,
        progress: u8,
    ) -> Result<()> {
        let req = TransitionRequest {
            worker_id: self.worker_id.clone(),
            transition,
            stage: stage.to_string(),
            progress,
        };
        Ok(self.client.record_transition(job_id, &req).await?)
    }

    async fn finish(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<String>,
        stage: Option<String>,
    ) -> Result<()> {
        let req = FinishRequest {
            worker_id: self.worker_id.clone(),
            status,
            error,
            stage,
        };
        Ok(self.client.finish_job(job_id, &req).await?)
    }
}
