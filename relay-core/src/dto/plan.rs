//! Plan inspection DTOs

use serde::{Deserialize, Serialize};

use crate::domain::step::StepStatus;

/// One row of `GET /plan/{job_id}`: declared intent with its effective status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub step_name: String,
    pub step_order: i32,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub depends_on: Vec<String>,
    pub critical: bool,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Present only when the step was actually attempted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}
