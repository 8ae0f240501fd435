//! Public job API endpoints

use relay_core::dto::job::{JobResults, JobStatusView, JobSummary, SubmitJob, SubmitResponse};
use relay_core::dto::plan::PlanEntry;
use uuid::Uuid;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// Submit a new job; returns as soon as the job is queued
    pub async fn submit(&self, req: SubmitJob) -> Result<SubmitResponse> {
        let response = self.client.post(self.url("/run")).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Poll the merged status of a job
    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatusView> {
        let url = self.url(&format!("/status/{}", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Inspect the plan of a job with per-step status and errors
    pub async fn get_plan(&self, job_id: Uuid) -> Result<Vec<PlanEntry>> {
        let url = self.url(&format!("/plan/{}", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Fetch the assembled results of a completed job
    ///
    /// Fails with a 409 API error while the job has not completed.
    pub async fn get_results(&self, job_id: Uuid) -> Result<JobResults> {
        let url = self.url(&format!("/results/{}", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Cancel a running job
    pub async fn cancel(&self, job_id: Uuid) -> Result<()> {
        let url = self.url(&format!("/job/{}/cancel", job_id));
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// List all jobs, newest first
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let response = self.client.get(self.url("/jobs")).send().await?;

        self.handle_response(response).await
    }
}
