//! Worker API endpoints used by runners

use relay_core::domain::job::Job;
use relay_core::domain::plan::PlanStep;
use relay_core::dto::worker::{
    ExecutionState, FinishRequest, LeaseRequest, ReleaseRequest, SavePlanRequest,
    TransitionRequest,
};
use uuid::Uuid;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// Claim the oldest unowned job, if any
    pub async fn claim_job(&self, worker_id: &str, lease_seconds: u64) -> Result<Option<Job>> {
        let response = self
            .client
            .post(self.url("/worker/claim"))
            .json(&LeaseRequest {
                worker_id: worker_id.to_string(),
                lease_seconds,
            })
            .send()
            .await?;

        self.handle_optional_response(response).await
    }

    /// Extend the lease on an owned job; 409 when ownership was lost
    pub async fn renew_lease(&self, job_id: Uuid, worker_id: &str, lease_seconds: u64) -> Result<()> {
        let url = self.url(&format!("/worker/jobs/{}/lease", job_id));
        let response = self
            .client
            .post(&url)
            .json(&LeaseRequest {
                worker_id: worker_id.to_string(),
                lease_seconds,
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Give up ownership so another runner may pick the job up
    pub async fn release_job(&self, job_id: Uuid, worker_id: &str) -> Result<()> {
        let url = self.url(&format!("/worker/jobs/{}/release", job_id));
        let response = self
            .client
            .post(&url)
            .json(&ReleaseRequest {
                worker_id: worker_id.to_string(),
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Load the persisted plan, reality records and outputs of a job
    pub async fn execution_state(&self, job_id: Uuid) -> Result<ExecutionState> {
        let url = self.url(&format!("/worker/jobs/{}/state", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Persist a validated plan
    pub async fn save_plan(&self, job_id: Uuid, worker_id: &str, steps: Vec<PlanStep>) -> Result<()> {
        let url = self.url(&format!("/worker/jobs/{}/plan", job_id));
        let response = self
            .client
            .put(&url)
            .json(&SavePlanRequest {
                worker_id: worker_id.to_string(),
                steps,
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Persist one step transition
    pub async fn record_transition(&self, job_id: Uuid, req: &TransitionRequest) -> Result<()> {
        let url = self.url(&format!("/worker/jobs/{}/transitions", job_id));
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_empty_response(response).await
    }

    /// Move a job to its terminal status
    pub async fn finish_job(&self, job_id: Uuid, req: &FinishRequest) -> Result<()> {
        let url = self.url(&format!("/worker/jobs/{}/finish", job_id));
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_empty_response(response).await
    }
}
