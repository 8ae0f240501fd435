//! Job DTOs for the public API

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{Job, JobStatus};
use crate::domain::plan::PlanStep;
use crate::domain::step::{Document, StepStatus};

/// Body of `POST /run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJob {
    pub subject_id: String,
    /// Explicit plan, validated synchronously; when absent the runner plans
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<PlanStep>>,
}

/// Response of `POST /run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
}

/// One entry of the polling view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    pub step_name: String,
    pub status: StepStatus,
}

/// Response of `GET /status/{job_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub subject_id: String,
    pub stage: String,
    pub progress: u8,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub steps: Vec<StepState>,
}

/// Response of `GET /results/{job_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResults {
    pub job_id: Uuid,
    pub subject_id: String,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub outputs: HashMap<String, Document>,
}

/// Lightweight job entry for history listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub subject_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            subject_id: job.subject_id,
            status: job.status,
            progress: job.progress,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}
