//! Worker protocol DTOs
//!
//! Runners pull jobs from the orchestrator's queue through a lease. Every
//! write a runner makes names its `worker_id`; the orchestrator applies it
//! only while that runner still owns the job.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::job::{Job, JobStatus};
use crate::domain::plan::PlanStep;
use crate::domain::step::{Document, ExecutedStep};

/// Claim the next job, or renew the lease on one already held
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub worker_id: String,
    pub lease_seconds: u64,
}

/// Give up ownership of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub worker_id: String,
}

/// Persist the planner's output for a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavePlanRequest {
    pub worker_id: String,
    pub steps: Vec<PlanStep>,
}

/// A single step state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepTransition {
    /// pending -> running, or a retry of a step left running by a crash
    Started { step_name: String },
    /// running -> done, persisted together with the step output
    Succeeded { step_name: String, output: Document },
    /// running -> failed
    Failed { step_name: String, error: String },
    /// pending -> skipped; updates intent only, never creates a reality row
    Skipped { step_name: String },
}

impl StepTransition {
    pub fn step_name(&self) -> &str {
        match self {
            StepTransition::Started { step_name }
            | StepTransition::Succeeded { step_name, .. }
            | StepTransition::Failed { step_name, .. }
            | StepTransition::Skipped { step_name } => step_name,
        }
    }
}

/// A transition plus the job's resulting stage and progress, applied atomically
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub worker_id: String,
    pub transition: StepTransition,
    pub stage: String,
    pub progress: u8,
}

/// Move a job to its terminal status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishRequest {
    pub worker_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

/// Everything a runner needs to start or resume a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub job: Job,
    /// Declared steps; empty until the plan is saved
    pub plan: Vec<PlanStep>,
    pub executed: Vec<ExecutedStep>,
    pub outputs: HashMap<String, Document>,
}
