//! Step status and reality records

use serde::{Deserialize, Serialize};

/// Opaque JSON document passed into and produced by step handlers
pub type Document = serde_json::Value;

/// Lifecycle of a single step: `pending -> running -> {done | failed | skipped}`
///
/// `skipped` may also be reached directly from `pending` when a step is never
/// attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Done => "done",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    /// Terminal states count towards job progress
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Done | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "running" => Ok(StepStatus::Running),
            "done" => Ok(StepStatus::Done),
            "failed" => Ok(StepStatus::Failed),
            "skipped" => Ok(StepStatus::Skipped),
            other => Err(format!("unknown step status '{}'", other)),
        }
    }
}

/// Evidence that the executor actually attempted a step
///
/// At most one exists per (job, step name); a retry updates it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedStep {
    pub step_name: String,
    pub status: StepStatus,
    pub error: Option<String>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}
