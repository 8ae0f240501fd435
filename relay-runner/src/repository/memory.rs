//! In-memory plan store for executor tests
//!
//! Applies the same rules as the orchestrator: reality rows are upserted,
//! intent only ever moves from `pending` to `skipped`, progress never
//! decreases, and writes to a job that is no longer running conflict.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use relay_core::InfrastructureError;
use relay_core::domain::job::{Job, JobStatus};
use relay_core::domain::plan::PlanStep;
use relay_core::domain::step::{ExecutedStep, StepStatus};
use relay_core::dto::worker::{ExecutionState, StepTransition};
use uuid::Uuid;

use super::{JobRepository, Result};

#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: Mutex<HashMap<Uuid, ExecutionState>>,
    /// Every accepted transition in order, with the progress it carried
    history: Mutex<Vec<(StepTransition, u8)>>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a job, optionally with a plan already attached
    pub fn insert_job(&self, subject_id: &str, plan: Vec<PlanStep>) -> Uuid {
        let job = Job {
            id: Uuid::new_v4(),
            subject_id: subject_id.to_string(),
            status: JobStatus::Running,
            stage: "Queued".to_string(),
            progress: 0,
            error: None,
            created_at: chrono::Utc::now(),
            completed_at: None,
        };
        let id = job.id;

        let plan = plan
            .into_iter()
            .enumerate()
            .map(|(i, mut step)| {
                step.step_order = i as i32;
                step
            })
            .collect();

        self.jobs.lock().unwrap().insert(
            id,
            ExecutionState {
                job,
                plan,
                executed: Vec::new(),
                outputs: HashMap::new(),
            },
        );
        id
    }

    /// Overwrite the reality record of a step, as a crashed run would leave it
    pub fn seed_executed(&self, job_id: Uuid, step_name: &str, status: StepStatus) {
        let mut jobs = self.jobs.lock().unwrap();
        let state = jobs.get_mut(&job_id).unwrap();
        upsert(&mut state.executed, step_name, status, None);
    }

    pub fn seed_output(&self, job_id: Uuid, step_name: &str, output: serde_json::Value) {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.get_mut(&job_id)
            .unwrap()
            .outputs
            .insert(step_name.to_string(), output);
    }

    /// Fail the job from outside, the way a user cancellation does
    pub fn cancel(&self, job_id: Uuid) {
        let mut jobs = self.jobs.lock().unwrap();
        let state = jobs.get_mut(&job_id).unwrap();
        state.job.status = JobStatus::Failed;
        state.job.stage = "Cancelled".to_string();
        state.job.progress = 100;
    }

    pub fn state(&self, job_id: Uuid) -> ExecutionState {
        self.jobs.lock().unwrap()[&job_id].clone()
    }

    pub fn history(&self) -> Vec<(StepTransition, u8)> {
        self.history.lock().unwrap().clone()
    }

    /// Number of times a step was started
    pub fn starts(&self, step_name: &str) -> usize {
        self.history()
            .iter()
            .filter(|(t, _)| {
                matches!(t, StepTransition::Started { step_name: s } if s == step_name)
            })
            .count()
    }
}

fn upsert(executed: &mut Vec<ExecutedStep>, step_name: &str, status: StepStatus, error: Option<String>) {
    let now = chrono::Utc::now();
    match executed.iter_mut().find(|e| e.step_name == step_name) {
        Some(existing) => {
            if status == StepStatus::Running {
                existing.started_at = Some(now);
            }
            existing.status = status;
            existing.error = error;
            existing.updated_at = now;
        }
        None => executed.push(ExecutedStep {
            step_name: step_name.to_string(),
            status,
            error,
            started_at: (status == StepStatus::Running).then_some(now),
            updated_at: now,
        }),
    }
}

fn owned(jobs: &mut HashMap<Uuid, ExecutionState>, job_id: Uuid) -> Result<&mut ExecutionState> {
    let state = jobs
        .get_mut(&job_id)
        .ok_or_else(|| InfrastructureError::NotFound(format!("job {}", job_id)))?;

    if state.job.status != JobStatus::Running {
        return Err(InfrastructureError::Conflict(format!(
            "job {} is {}",
            job_id, state.job.status
        )));
    }

    Ok(state)
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn execution_state(&self, job_id: Uuid) -> Result<ExecutionState> {
        self.jobs
            .lock()
            .unwrap()
            .get(&job_id)
            .cloned()
            .ok_or_else(|| InfrastructureError::NotFound(format!("job {}", job_id)))
    }

    async fn save_plan(&self, job_id: Uuid, steps: Vec<PlanStep>) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let state = owned(&mut jobs, job_id)?;
        if state.plan.is_empty() {
            state.plan = steps;
        }
        Ok(())
    }

    async fn record_transition(
        &self,
        job_id: Uuid,
        transition: StepTransition,
        stage: &str,
        progress: u8,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let state = owned(&mut jobs, job_id)?;

        match &transition {
            StepTransition::Started { step_name } => {
                upsert(&mut state.executed, step_name, StepStatus::Running, None);
            }
            StepTransition::Succeeded { step_name, output } => {
                upsert(&mut state.executed, step_name, StepStatus::Done, None);
                state.outputs.insert(step_name.clone(), output.clone());
            }
            StepTransition::Failed { step_name, error } => {
                upsert(
                    &mut state.executed,
                    step_name,
                    StepStatus::Failed,
                    Some(error.clone()),
                );
            }
            StepTransition::Skipped { step_name } => {
                if let Some(step) = state
                    .plan
                    .iter_mut()
                    .find(|s| &s.step_name == step_name && s.status == StepStatus::Pending)
                {
                    step.status = StepStatus::Skipped;
                }
            }
        }

        state.job.stage = stage.to_string();
        state.job.progress = state.job.progress.max(progress);
        self.history.lock().unwrap().push((transition, progress));
        Ok(())
    }

    async fn finish(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<String>,
        stage: Option<String>,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let state = owned(&mut jobs, job_id)?;

        if status == JobStatus::Failed {
            let attempted: Vec<String> =
                state.executed.iter().map(|e| e.step_name.clone()).collect();
            for step in state.plan.iter_mut() {
                if step.status == StepStatus::Pending && !attempted.contains(&step.step_name) {
                    step.status = StepStatus::Skipped;
                }
            }
        }

        state.job.status = status;
        state.job.error = error;
        if let Some(stage) = stage {
            state.job.stage = stage;
        }
        state.job.progress = 100;
        state.job.completed_at = Some(chrono::Utc::now());
        Ok(())
    }
}
