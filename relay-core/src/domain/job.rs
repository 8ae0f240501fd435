//! Job domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One end-to-end pipeline run
///
/// Created by the orchestrator at submission, mutated by the executor on
/// every step transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// What the pipeline runs for, e.g. a ticket id
    pub subject_id: String,
    pub status: JobStatus,
    /// Human-readable label of the current stage
    pub stage: String,
    /// 0..=100, never decreases
    pub progress: u8,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Progress percentage for `finished` terminal steps out of `total`, rounded down
///
/// An empty plan counts as fully progressed.
pub fn progress_percent(finished: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let finished = finished.min(total);
    ((finished * 100) / total) as u8
}
