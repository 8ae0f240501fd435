//! Plan executor
//!
//! Drives one job from its declared plan to a terminal status:
//! - plans the job once if no plan is stored yet
//! - dispatches every pending step whose dependencies are all `done`,
//!   up to `max_parallel_steps` at a time
//! - persists each transition before moving on, from this loop only
//! - applies the failure policy: a critical failure stops dispatching,
//!   skips every pending step at once and fails the job when the steps
//!   still in flight have reported; a non-critical failure skips only its
//!   dependents
//!
//! Resuming a partially executed job is safe: finished steps are kept, and
//! a step still recorded `running` is dispatched again and its record
//! updated in place.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use relay_core::domain::job::{Job, JobStatus, progress_percent};
use relay_core::domain::plan::{Plan, PlanStep};
use relay_core::domain::step::{Document, StepStatus};
use relay_core::dto::worker::{ExecutionState, StepTransition};
use relay_core::projection::effective_statuses;
use relay_core::{HandlerError, InfrastructureError, PlanError, validate};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::handler::HandlerRegistry;
use crate::planner::Planner;
use crate::repository::JobRepository;

/// Limits applied to every job this executor drives
#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub max_parallel_steps: usize,
    pub default_step_timeout: Duration,
}

/// How an execution attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    /// Ownership was lost mid-run; nothing more was written
    Abandoned,
}

type StepResult = Result<Document, HandlerError>;

/// Recorded when a handler fails without saying why
const FALLBACK_STEP_ERROR: &str = "step failed";

pub struct Executor {
    repository: Arc<dyn JobRepository>,
    registry: Arc<HandlerRegistry>,
    planner: Arc<dyn Planner>,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        registry: Arc<HandlerRegistry>,
        planner: Arc<dyn Planner>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            repository,
            registry,
            planner,
            settings,
        }
    }

    /// Run (or resume) a job until it reaches a terminal status
    pub async fn run(
        &self,
        job_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, InfrastructureError> {
        let mut state = self.repository.execution_state(job_id).await?;

        match state.job.status {
            JobStatus::Completed => return Ok(JobOutcome::Completed),
            JobStatus::Failed => return Ok(JobOutcome::Failed),
            JobStatus::Running => {}
        }

        if state.plan.is_empty() {
            if !self.plan_job(&state.job).await? {
                return Ok(JobOutcome::Failed);
            }
            state = self.repository.execution_state(job_id).await?;
        }

        // Stored plans may come from a submitter with a different agent catalog
        if let Err(e) = validate(&Plan::new(state.plan.clone()), self.registry.as_ref()) {
            self.reject_plan(job_id, &e).await?;
            return Ok(JobOutcome::Failed);
        }

        let mut run = RunState::resume(state);
        self.drive(&mut run, &cancel).await
    }

    // =========================================================================
    // Planning
    // =========================================================================

    /// Returns false when the job was failed instead of planned
    async fn plan_job(&self, job: &Job) -> Result<bool, InfrastructureError> {
        info!("Planning job {} for {}", job.id, job.subject_id);

        let steps = match self.planner.plan(job).await {
            Ok(steps) => steps,
            Err(e) => {
                error!("Planning job {} failed: {}", job.id, e);
                self.repository
                    .finish(
                        job.id,
                        JobStatus::Failed,
                        Some(e.to_string()),
                        Some(format!("Planning failed: {}", e)),
                    )
                    .await?;
                return Ok(false);
            }
        };

        if let Err(e) = validate(&Plan::new(steps.clone()), self.registry.as_ref()) {
            self.reject_plan(job.id, &e).await?;
            return Ok(false);
        }

        info!("Job {} planned with {} steps", job.id, steps.len());
        self.repository.save_plan(job.id, steps).await?;
        Ok(true)
    }

    async fn reject_plan(&self, job_id: Uuid, err: &PlanError) -> Result<(), InfrastructureError> {
        error!("Plan of job {} rejected: {}", job_id, err);
        self.repository
            .finish(
                job_id,
                JobStatus::Failed,
                Some(err.to_string()),
                Some(format!("Plan rejected: {}", err)),
            )
            .await
    }

    // =========================================================================
    // Scheduling Loop
    // =========================================================================

    async fn drive(
        &self,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, InfrastructureError> {
        let mut in_flight: JoinSet<StepResult> = JoinSet::new();
        let mut tasks: HashMap<tokio::task::Id, String> = HashMap::new();

        loop {
            if cancel.is_cancelled() {
                return Ok(abandon(run, &mut in_flight));
            }

            if run.critical_failure.is_none() {
                self.skip_blocked(run).await?;

                for step_name in run.ready() {
                    if in_flight.len() >= self.settings.max_parallel_steps {
                        break;
                    }
                    self.start_step(run, &step_name, &mut in_flight, &mut tasks)
                        .await?;
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let joined = tokio::select! {
                joined = in_flight.join_next_with_id() => joined,
                _ = cancel.cancelled() => return Ok(abandon(run, &mut in_flight)),
            };

            let (id, result) = match joined {
                Some(Ok((id, result))) => (id, result),
                Some(Err(e)) => (e.id(), Err(HandlerError::failed(format!("handler panicked: {}", e)))),
                None => break,
            };

            let Some(step_name) = tasks.remove(&id) else {
                warn!("Job {}: finished task {} has no step", run.job_id, id);
                continue;
            };

            self.complete_step(run, step_name, result).await?;
        }

        // Whatever never became ready is declared skipped
        self.settle_pending(run).await?;

        let (status, outcome) = match &run.critical_failure {
            Some(_) => (JobStatus::Failed, JobOutcome::Failed),
            None => (JobStatus::Completed, JobOutcome::Completed),
        };

        self.repository
            .finish(run.job_id, status, run.critical_failure.clone(), None)
            .await?;

        info!("Job {} {}", run.job_id, status);
        Ok(outcome)
    }

    /// Persist `running`, then hand the step to its handler
    async fn start_step(
        &self,
        run: &mut RunState,
        step_name: &str,
        in_flight: &mut JoinSet<StepResult>,
        tasks: &mut HashMap<tokio::task::Id, String>,
    ) -> Result<(), InfrastructureError> {
        let Some(step) = run.plan.get(step_name).cloned() else {
            return Ok(());
        };

        if run.statuses.get(step_name) == Some(&StepStatus::Running) {
            return Ok(());
        }

        run.statuses.insert(step.step_name.clone(), StepStatus::Running);
        run.running.push(step.step_name.clone());
        run.interrupted.remove(step_name);
        run.stage = step.display_label().to_string();

        self.repository
            .record_transition(
                run.job_id,
                StepTransition::Started {
                    step_name: step.step_name.clone(),
                },
                &run.stage,
                run.progress,
            )
            .await?;

        info!("Job {}: step {} started ({})", run.job_id, step.step_name, step.agent);

        let dependency_outputs: HashMap<String, Document> = step
            .depends_on
            .iter()
            .filter_map(|d| run.outputs.get(d).map(|o| (d.clone(), o.clone())))
            .collect();

        let timeout = step
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.settings.default_step_timeout);
        let handler = self.registry.get(&step.agent);
        let agent = step.agent.clone();
        let params = step.params;

        let task = in_flight.spawn(async move {
            let Some(handler) = handler else {
                return Err(HandlerError::InvalidInput(format!(
                    "no handler registered for agent '{}'",
                    agent
                )));
            };

            match tokio::time::timeout(timeout, handler.handle(&params, &dependency_outputs)).await {
                Ok(result) => result,
                Err(_) => Err(HandlerError::Timeout(timeout)),
            }
        });
        tasks.insert(task.id(), step.step_name);

        Ok(())
    }

    /// Persist a handler's outcome and apply the failure policy
    async fn complete_step(
        &self,
        run: &mut RunState,
        step_name: String,
        result: StepResult,
    ) -> Result<(), InfrastructureError> {
        let Some(step) = run.plan.get(&step_name).cloned() else {
            return Ok(());
        };

        run.running.retain(|n| n != &step_name);

        let transition = match result {
            Ok(output) => {
                info!("Job {}: step {} done", run.job_id, step_name);
                run.statuses.insert(step_name.clone(), StepStatus::Done);
                run.outputs.insert(step_name.clone(), output.clone());
                StepTransition::Succeeded {
                    step_name: step_name.clone(),
                    output,
                }
            }
            Err(err) => {
                let mut message = err.to_string();
                if message.trim().is_empty() {
                    message = FALLBACK_STEP_ERROR.to_string();
                }

                if step.critical {
                    error!("Job {}: critical step {} failed: {}", run.job_id, step_name, message);
                    run.critical_failure =
                        Some(format!("Critical step {} failed: {}", step_name, message));
                } else {
                    warn!("Job {}: step {} failed: {}", run.job_id, step_name, message);
                }
                run.statuses.insert(step_name.clone(), StepStatus::Failed);
                StepTransition::Failed {
                    step_name: step_name.clone(),
                    error: message,
                }
            }
        };

        run.stage = match &run.critical_failure {
            Some(reason) => reason.clone(),
            None => run.current_stage(&step),
        };
        run.progress = run.next_progress();

        self.repository
            .record_transition(run.job_id, transition, &run.stage, run.progress)
            .await?;

        // The abort is visible right away; in-flight siblings still record
        // their outcomes before the job is finished
        if step.critical && run.statuses.get(&step_name) == Some(&StepStatus::Failed) {
            self.settle_pending(run).await?;
        }

        Ok(())
    }

    /// Close every step still pending: skipped, or failed if a previous
    /// attempt already left it `running`
    async fn settle_pending(&self, run: &mut RunState) -> Result<(), InfrastructureError> {
        for step_name in run.with_status(StepStatus::Pending) {
            if run.interrupted.contains(&step_name) {
                self.abort_interrupted(run, &step_name).await?;
            } else {
                self.skip_step(run, &step_name).await?;
            }
        }
        Ok(())
    }

    /// Skip every pending step that depends on a failed or skipped step
    ///
    /// Repeats until nothing changes, so skips propagate transitively.
    async fn skip_blocked(&self, run: &mut RunState) -> Result<(), InfrastructureError> {
        loop {
            let blocked = run.blocked();
            if blocked.is_empty() {
                return Ok(());
            }

            for step_name in blocked {
                self.skip_step(run, &step_name).await?;
            }
        }
    }

    /// A step left `running` by a previous attempt already has a reality row,
    /// so it is closed as failed instead of skipped
    async fn abort_interrupted(&self, run: &mut RunState, step_name: &str) -> Result<(), InfrastructureError> {
        warn!("Job {}: step {} was interrupted and will not be retried", run.job_id, step_name);

        run.statuses.insert(step_name.to_string(), StepStatus::Failed);
        run.progress = run.next_progress();

        self.repository
            .record_transition(
                run.job_id,
                StepTransition::Failed {
                    step_name: step_name.to_string(),
                    error: "interrupted before completion".to_string(),
                },
                &run.stage,
                run.progress,
            )
            .await
    }

    async fn skip_step(&self, run: &mut RunState, step_name: &str) -> Result<(), InfrastructureError> {
        debug!("Job {}: skipping step {}", run.job_id, step_name);

        run.statuses.insert(step_name.to_string(), StepStatus::Skipped);
        run.progress = run.next_progress();

        self.repository
            .record_transition(
                run.job_id,
                StepTransition::Skipped {
                    step_name: step_name.to_string(),
                },
                &run.stage,
                run.progress,
            )
            .await
    }
}

fn abandon(run: &RunState, in_flight: &mut JoinSet<StepResult>) -> JobOutcome {
    warn!(
        "Job {}: ownership lost, abandoning {} in-flight step(s)",
        run.job_id,
        in_flight.len()
    );
    in_flight.abort_all();
    JobOutcome::Abandoned
}

// =============================================================================
// Run State
// =============================================================================

/// The executor's working copy of one job
struct RunState {
    job_id: Uuid,
    plan: Plan,
    statuses: HashMap<String, StepStatus>,
    outputs: HashMap<String, Document>,
    /// Steps in flight, in dispatch order
    running: Vec<String>,
    /// Steps a previous attempt left `running`
    interrupted: HashSet<String>,
    stage: String,
    progress: u8,
    critical_failure: Option<String>,
}

impl RunState {
    fn resume(state: ExecutionState) -> Self {
        let mut statuses = effective_statuses(&state.plan, &state.executed);
        let mut interrupted = HashSet::new();

        for (name, status) in statuses.iter_mut() {
            if *status == StepStatus::Running {
                info!("Job {}: step {} was interrupted, retrying", state.job.id, name);
                *status = StepStatus::Pending;
                interrupted.insert(name.clone());
            }
        }

        let critical_failure = state
            .plan
            .iter()
            .filter(|s| s.critical && statuses.get(&s.step_name) == Some(&StepStatus::Failed))
            .map(|s| format!("Critical step {} failed", s.step_name))
            .next();

        Self {
            job_id: state.job.id,
            plan: Plan::new(state.plan),
            statuses,
            outputs: state.outputs,
            running: Vec::new(),
            interrupted,
            stage: state.job.stage,
            progress: state.job.progress,
            critical_failure,
        }
    }

    fn status(&self, step_name: &str) -> StepStatus {
        self.statuses.get(step_name).copied().unwrap_or_default()
    }

    fn with_status(&self, status: StepStatus) -> Vec<String> {
        self.plan
            .ordered()
            .into_iter()
            .filter(|s| self.status(&s.step_name) == status)
            .map(|s| s.step_name.clone())
            .collect()
    }

    /// Pending steps whose dependencies are all done, in plan order
    fn ready(&self) -> Vec<String> {
        self.pending_where(|step| {
            step.depends_on
                .iter()
                .all(|d| self.status(d) == StepStatus::Done)
        })
    }

    /// Pending steps that can never run because a dependency did not succeed
    fn blocked(&self) -> Vec<String> {
        self.pending_where(|step| {
            step.depends_on
                .iter()
                .any(|d| matches!(self.status(d), StepStatus::Failed | StepStatus::Skipped))
        })
    }

    fn pending_where(&self, predicate: impl Fn(&PlanStep) -> bool) -> Vec<String> {
        self.plan
            .ordered()
            .into_iter()
            .filter(|s| self.status(&s.step_name) == StepStatus::Pending && predicate(s))
            .map(|s| s.step_name.clone())
            .collect()
    }

    /// Label of the latest step still running, else of the step that just left
    fn current_stage(&self, finished: &PlanStep) -> String {
        self.running
            .last()
            .and_then(|name| self.plan.get(name))
            .unwrap_or(finished)
            .display_label()
            .to_string()
    }

    /// Never decreases; 100 is reserved for the terminal job transition
    fn next_progress(&self) -> u8 {
        let finished = self.statuses.values().filter(|s| s.is_terminal()).count();
        progress_percent(finished, self.plan.len())
            .min(99)
            .max(self.progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{MergeHandler, StepHandler};
    use crate::planner::{PlanningError, TemplatePlanner};
    use crate::repository::memory::MemoryJobRepository;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // =========================================================================
    // Test Handlers
    // =========================================================================

    /// Echoes its parameters and the names of the outputs it received
    struct Echo;

    #[async_trait]
    impl StepHandler for Echo {
        async fn handle(
            &self,
            params: &Document,
            deps: &HashMap<String, Document>,
        ) -> Result<Document, HandlerError> {
            let mut seen: Vec<&String> = deps.keys().collect();
            seen.sort();
            Ok(json!({ "params": params, "seen": seen }))
        }
    }

    struct Fail;

    #[async_trait]
    impl StepHandler for Fail {
        async fn handle(
            &self,
            _params: &Document,
            _deps: &HashMap<String, Document>,
        ) -> Result<Document, HandlerError> {
            Err(HandlerError::failed("boom"))
        }
    }

    /// Fails without any message
    struct Silent;

    #[async_trait]
    impl StepHandler for Silent {
        async fn handle(
            &self,
            _params: &Document,
            _deps: &HashMap<String, Document>,
        ) -> Result<Document, HandlerError> {
            Err(HandlerError::Failed(String::new()))
        }
    }

    struct Sleep(Duration);

    #[async_trait]
    impl StepHandler for Sleep {
        async fn handle(
            &self,
            _params: &Document,
            _deps: &HashMap<String, Document>,
        ) -> Result<Document, HandlerError> {
            tokio::time::sleep(self.0).await;
            Ok(json!({ "slept": true }))
        }
    }

    /// Counts calls and tracks how many run at once
    #[derive(Clone, Default)]
    struct Gauge {
        calls: Arc<AtomicUsize>,
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StepHandler for Gauge {
        async fn handle(
            &self,
            _params: &Document,
            _deps: &HashMap<String, Document>,
        ) -> Result<Document, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({}))
        }
    }

    /// Cancels the job from outside while the step is in flight
    struct CancelsJob {
        repo: Arc<MemoryJobRepository>,
        job_id: Arc<std::sync::Mutex<Option<Uuid>>>,
    }

    #[async_trait]
    impl StepHandler for CancelsJob {
        async fn handle(
            &self,
            _params: &Document,
            _deps: &HashMap<String, Document>,
        ) -> Result<Document, HandlerError> {
            if let Some(id) = *self.job_id.lock().unwrap() {
                self.repo.cancel(id);
            }
            Ok(json!({}))
        }
    }

    struct CyclicPlanner;

    #[async_trait]
    impl Planner for CyclicPlanner {
        async fn plan(&self, _job: &Job) -> Result<Vec<PlanStep>, PlanningError> {
            Ok(vec![
                PlanStep::new("a", "ok").depends_on(["b"]),
                PlanStep::new("b", "ok").depends_on(["a"]),
            ])
        }
    }

    struct DownPlanner;

    #[async_trait]
    impl Planner for DownPlanner {
        async fn plan(&self, _job: &Job) -> Result<Vec<PlanStep>, PlanningError> {
            Err(PlanningError::Unavailable("connection refused".to_string()))
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn registry() -> HandlerRegistry {
        HandlerRegistry::new()
            .with("ok", Echo)
            .with("fail", Fail)
            .with("slow", Sleep(Duration::from_secs(10)))
    }

    fn settings(max_parallel_steps: usize) -> ExecutorSettings {
        ExecutorSettings {
            max_parallel_steps,
            default_step_timeout: Duration::from_secs(5),
        }
    }

    fn executor(
        repo: &Arc<MemoryJobRepository>,
        registry: HandlerRegistry,
        settings: ExecutorSettings,
    ) -> Executor {
        Executor::new(
            repo.clone(),
            Arc::new(registry),
            Arc::new(TemplatePlanner),
            settings,
        )
    }

    fn final_statuses(repo: &MemoryJobRepository, job_id: Uuid) -> HashMap<String, StepStatus> {
        let state = repo.state(job_id);
        effective_statuses(&state.plan, &state.executed)
    }

    fn assert_monotonic(repo: &MemoryJobRepository) {
        let progress: Vec<u8> = repo.history().iter().map(|(_, p)| *p).collect();
        assert!(
            progress.windows(2).all(|w| w[0] <= w[1]),
            "progress went backwards: {:?}",
            progress
        );
        assert!(progress.iter().all(|p| *p < 100));
    }

    // =========================================================================
    // Failure Policy
    // =========================================================================

    #[tokio::test]
    async fn test_critical_failure_skips_dependents_but_siblings_finish() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job(
            "PROJ-1",
            vec![
                PlanStep::new("a", "fail").critical(),
                PlanStep::new("b", "ok").depends_on(["a"]),
                PlanStep::new("c", "ok"),
            ],
        );

        let outcome = executor(&repo, registry(), settings(4))
            .run(job_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Failed);

        let statuses = final_statuses(&repo, job_id);
        assert_eq!(statuses["a"], StepStatus::Failed);
        assert_eq!(statuses["b"], StepStatus::Skipped);
        assert_eq!(statuses["c"], StepStatus::Done);

        let state = repo.state(job_id);
        assert_eq!(state.job.status, JobStatus::Failed);
        assert_eq!(state.job.progress, 100);
        assert!(state.job.error.unwrap().contains("Critical step a failed"));

        let a = state.executed.iter().find(|e| e.step_name == "a").unwrap();
        assert_eq!(a.error.as_deref(), Some("boom"));
        assert!(state.executed.iter().all(|e| e.step_name != "b"));
        assert_monotonic(&repo);
    }

    #[tokio::test]
    async fn test_critical_failure_stops_dispatching() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job(
            "PROJ-1",
            vec![
                PlanStep::new("a", "fail").critical(),
                PlanStep::new("b", "ok"),
                PlanStep::new("c", "ok"),
            ],
        );

        executor(&repo, registry(), settings(1))
            .run(job_id, CancellationToken::new())
            .await
            .unwrap();

        let statuses = final_statuses(&repo, job_id);
        assert_eq!(statuses["b"], StepStatus::Skipped);
        assert_eq!(statuses["c"], StepStatus::Skipped);
        assert_eq!(repo.starts("b"), 0);
    }

    #[tokio::test]
    async fn test_timeout_of_critical_step_fails_job() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job(
            "PROJ-2",
            vec![
                PlanStep::new("a", "ok"),
                PlanStep::new("b", "slow").critical().depends_on(["a"]),
            ],
        );

        let settings = ExecutorSettings {
            max_parallel_steps: 4,
            default_step_timeout: Duration::from_millis(50),
        };
        let outcome = executor(&repo, registry(), settings)
            .run(job_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Failed);

        let state = repo.state(job_id);
        let statuses = final_statuses(&repo, job_id);
        assert_eq!(statuses["a"], StepStatus::Done);
        assert_eq!(statuses["b"], StepStatus::Failed);
        assert_eq!(state.job.status, JobStatus::Failed);
        assert_eq!(state.job.progress, 100);

        let b = state.executed.iter().find(|e| e.step_name == "b").unwrap();
        assert!(b.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_step_timeout_override() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job(
            "PROJ-2",
            vec![PlanStep::new("a", "slow").with_timeout(1)],
        );

        let started = std::time::Instant::now();
        executor(&repo, registry(), settings(4))
            .run(job_id, CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(final_statuses(&repo, job_id)["a"], StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_non_critical_failure_still_completes() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job(
            "PROJ-3",
            vec![PlanStep::new("a", "ok"), PlanStep::new("b", "fail")],
        );

        let outcome = executor(&repo, registry(), settings(4))
            .run(job_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Completed);

        let statuses = final_statuses(&repo, job_id);
        assert_eq!(statuses["a"], StepStatus::Done);
        assert_eq!(statuses["b"], StepStatus::Failed);

        let state = repo.state(job_id);
        assert_eq!(state.job.status, JobStatus::Completed);
        assert_eq!(state.job.progress, 100);
        assert!(state.job.error.is_none());
    }

    #[tokio::test]
    async fn test_non_critical_failure_skips_only_transitive_dependents() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job(
            "PROJ-4",
            vec![
                PlanStep::new("a", "fail"),
                PlanStep::new("b", "ok").depends_on(["a"]),
                PlanStep::new("c", "ok").depends_on(["b"]),
                PlanStep::new("d", "ok"),
                PlanStep::new("e", "ok").depends_on(["d"]),
            ],
        );

        let outcome = executor(&repo, registry(), settings(2))
            .run(job_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Completed);

        let statuses = final_statuses(&repo, job_id);
        assert_eq!(statuses["a"], StepStatus::Failed);
        assert_eq!(statuses["b"], StepStatus::Skipped);
        assert_eq!(statuses["c"], StepStatus::Skipped);
        assert_eq!(statuses["d"], StepStatus::Done);
        assert_eq!(statuses["e"], StepStatus::Done);

        let state = repo.state(job_id);
        assert_eq!(state.executed.len(), 3);
        assert_monotonic(&repo);
    }

    #[tokio::test]
    async fn test_critical_failure_is_visible_before_siblings_drain() {
        let registry = registry().with("nap", Sleep(Duration::from_millis(800)));

        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job(
            "PROJ-4",
            vec![
                PlanStep::new("a", "fail").critical(),
                PlanStep::new("b", "ok").depends_on(["a"]),
                PlanStep::new("c", "nap"),
            ],
        );

        let executor = executor(&repo, registry, settings(4));
        let handle = tokio::spawn(async move { executor.run(job_id, CancellationToken::new()).await });

        tokio::time::sleep(Duration::from_millis(200)).await;

        let statuses = final_statuses(&repo, job_id);
        assert_eq!(statuses["a"], StepStatus::Failed);
        assert_eq!(statuses["b"], StepStatus::Skipped);
        assert_eq!(statuses["c"], StepStatus::Running);
        assert!(repo.state(job_id).job.stage.starts_with("Critical step a failed"));

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, JobOutcome::Failed);

        let state = repo.state(job_id);
        assert_eq!(final_statuses(&repo, job_id)["c"], StepStatus::Done);
        assert_eq!(state.job.status, JobStatus::Failed);
        assert!(state.job.stage.starts_with("Critical step a failed"));
        assert_monotonic(&repo);
    }

    #[tokio::test]
    async fn test_silent_critical_failure_still_records_an_error() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job("PROJ-4", vec![PlanStep::new("a", "silent").critical()]);

        executor(&repo, registry().with("silent", Silent), settings(4))
            .run(job_id, CancellationToken::new())
            .await
            .unwrap();

        let state = repo.state(job_id);
        let a = state.executed.iter().find(|e| e.step_name == "a").unwrap();
        assert_eq!(a.error.as_deref(), Some("step failed"));
        assert_eq!(state.job.error.as_deref(), Some("Critical step a failed: step failed"));
    }

    #[tokio::test]
    async fn test_http_agent_is_bounded_by_step_timeout_not_default() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let mut config = crate::config::Config::default()
            .with_agent("vision", &format!("http://{}/handle", addr));
        config.step_timeout = Duration::from_millis(100);
        let registry = HandlerRegistry::from_config(&config);

        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job("PROJ-5", vec![PlanStep::new("a", "vision").with_timeout(2)]);

        let settings = ExecutorSettings {
            max_parallel_steps: 4,
            default_step_timeout: config.step_timeout,
        };
        let started = std::time::Instant::now();
        executor(&repo, registry, settings)
            .run(job_id, CancellationToken::new())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(2), "cut short after {:?}", elapsed);
        let state = repo.state(job_id);
        let a = state.executed.iter().find(|e| e.step_name == "a").unwrap();
        assert_eq!(a.status, StepStatus::Failed);
        assert!(a.error.as_deref().unwrap().starts_with("timed out"));
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    #[tokio::test]
    async fn test_dependencies_receive_outputs() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job(
            "PROJ-5",
            vec![
                PlanStep::new("a", "ok").with_params(json!({ "n": 1 })),
                PlanStep::new("b", "ok"),
                PlanStep::new("c", "ok").depends_on(["a", "b"]),
            ],
        );

        executor(&repo, registry(), settings(4))
            .run(job_id, CancellationToken::new())
            .await
            .unwrap();

        let outputs = repo.state(job_id).outputs;
        assert_eq!(outputs["a"]["params"]["n"], 1);
        assert_eq!(outputs["c"]["seen"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let gauge = Gauge::default();
        let registry = HandlerRegistry::new().with("gauge", gauge.clone());

        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job(
            "PROJ-6",
            (0..6)
                .map(|i| PlanStep::new(format!("s{}", i), "gauge"))
                .collect(),
        );

        executor(&repo, registry, settings(2))
            .run(job_id, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(gauge.calls.load(Ordering::SeqCst), 6);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
        assert_eq!(repo.state(job_id).job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_template_pipeline_end_to_end() {
        let registry = HandlerRegistry::new()
            .with("jira", Echo)
            .with("internal", MergeHandler)
            .with("figma", Echo)
            .with("browser", Echo)
            .with("vision", Echo)
            .with("synthesis", Echo)
            .with("slack", Echo);

        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job("PROJ-7", vec![]);

        let outcome = executor(&repo, registry, settings(4))
            .run(job_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Completed);

        let state = repo.state(job_id);
        assert_eq!(state.plan.len(), 7);
        assert_eq!(state.outputs.len(), 7);
        assert_eq!(state.job.progress, 100);
        assert_eq!(state.job.stage, "Delivering to Slack...");
        assert_eq!(state.outputs["jira_fetch"]["params"]["ticket_id"], "PROJ-7");
        assert_monotonic(&repo);
    }

    // =========================================================================
    // Planning
    // =========================================================================

    #[tokio::test]
    async fn test_invalid_planner_output_fails_job_without_persisting() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job("PROJ-8", vec![]);

        let executor = Executor::new(
            repo.clone(),
            Arc::new(registry()),
            Arc::new(CyclicPlanner),
            settings(4),
        );
        let outcome = executor.run(job_id, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, JobOutcome::Failed);

        let state = repo.state(job_id);
        assert!(state.plan.is_empty());
        assert_eq!(state.job.status, JobStatus::Failed);
        assert!(state.job.stage.starts_with("Plan rejected"));
        assert!(repo.history().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_agent_in_stored_plan_is_rejected() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job("PROJ-8", vec![PlanStep::new("a", "figma")]);

        let outcome = executor(&repo, registry(), settings(4))
            .run(job_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Failed);

        let statuses = final_statuses(&repo, job_id);
        assert_eq!(statuses["a"], StepStatus::Skipped);
        assert!(repo.state(job_id).job.stage.starts_with("Plan rejected"));
    }

    #[tokio::test]
    async fn test_planner_outage_fails_job() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job("PROJ-9", vec![]);

        let executor = Executor::new(
            repo.clone(),
            Arc::new(registry()),
            Arc::new(DownPlanner),
            settings(4),
        );
        executor.run(job_id, CancellationToken::new()).await.unwrap();

        let state = repo.state(job_id);
        assert_eq!(state.job.status, JobStatus::Failed);
        assert!(state.job.stage.starts_with("Planning failed"));
    }

    // =========================================================================
    // Resumption and Ownership
    // =========================================================================

    fn chain() -> Vec<PlanStep> {
        vec![
            PlanStep::new("a", "gauge"),
            PlanStep::new("b", "ok").depends_on(["a"]),
            PlanStep::new("c", "ok").depends_on(["b"]),
        ]
    }

    #[tokio::test]
    async fn test_resume_retries_interrupted_step_without_repeating_done_work() {
        let gauge = Gauge::default();
        let registry = registry().with("gauge", gauge.clone());

        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job("PROJ-10", chain());
        repo.seed_executed(job_id, "a", StepStatus::Done);
        repo.seed_output(job_id, "a", json!({ "ticket": "PROJ-10" }));
        repo.seed_executed(job_id, "b", StepStatus::Running);

        let outcome = executor(&repo, registry, settings(4))
            .run(job_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Completed);

        assert_eq!(gauge.calls.load(Ordering::SeqCst), 0);
        assert_eq!(repo.starts("a"), 0);
        assert_eq!(repo.starts("b"), 1);

        let state = repo.state(job_id);
        assert_eq!(state.executed.len(), 3);
        assert_eq!(state.outputs["a"]["ticket"], "PROJ-10");
        assert_eq!(state.outputs["b"]["seen"], json!(["a"]));
    }

    #[tokio::test]
    async fn test_resumed_run_matches_uninterrupted_run() {
        let uninterrupted = Arc::new(MemoryJobRepository::new());
        let first = uninterrupted.insert_job("PROJ-11", chain());
        executor(&uninterrupted, registry().with("gauge", Gauge::default()), settings(4))
            .run(first, CancellationToken::new())
            .await
            .unwrap();

        let resumed = Arc::new(MemoryJobRepository::new());
        let second = resumed.insert_job("PROJ-11", chain());
        resumed.seed_executed(second, "a", StepStatus::Done);
        resumed.seed_output(second, "a", json!({}));
        executor(&resumed, registry().with("gauge", Gauge::default()), settings(4))
            .run(second, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(final_statuses(&uninterrupted, first), final_statuses(&resumed, second));
        assert_eq!(
            uninterrupted.state(first).job.status,
            resumed.state(second).job.status
        );
    }

    #[tokio::test]
    async fn test_resume_after_critical_failure_closes_interrupted_step() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job(
            "PROJ-11",
            vec![
                PlanStep::new("a", "fail").critical(),
                PlanStep::new("b", "ok"),
                PlanStep::new("c", "ok").depends_on(["a"]),
            ],
        );
        repo.seed_executed(job_id, "a", StepStatus::Failed);
        repo.seed_executed(job_id, "b", StepStatus::Running);

        let outcome = executor(&repo, registry(), settings(4))
            .run(job_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Failed);
        assert_eq!(repo.starts("b"), 0);

        let statuses = final_statuses(&repo, job_id);
        assert_eq!(statuses["b"], StepStatus::Failed);
        assert_eq!(statuses["c"], StepStatus::Skipped);
        assert_eq!(repo.state(job_id).job.progress, 100);
    }

    #[tokio::test]
    async fn test_finished_job_is_left_alone() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job("PROJ-12", chain());
        repo.cancel(job_id);

        let outcome = executor(&repo, registry().with("gauge", Gauge::default()), settings(4))
            .run(job_id, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, JobOutcome::Failed);
        assert!(repo.history().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_job_rejects_further_writes() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job_slot = Arc::new(std::sync::Mutex::new(None));
        let registry = registry().with(
            "cancel",
            CancelsJob {
                repo: repo.clone(),
                job_id: job_slot.clone(),
            },
        );

        let job_id = repo.insert_job(
            "PROJ-13",
            vec![
                PlanStep::new("a", "cancel"),
                PlanStep::new("b", "ok").depends_on(["a"]),
            ],
        );
        *job_slot.lock().unwrap() = Some(job_id);

        let err = executor(&repo, registry, settings(4))
            .run(job_id, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let state = repo.state(job_id);
        assert_eq!(state.job.stage, "Cancelled");
        assert_eq!(repo.starts("b"), 0);
    }

    #[tokio::test]
    async fn test_lost_lease_abandons_job() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job_id = repo.insert_job("PROJ-14", vec![PlanStep::new("a", "slow")]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let outcome = executor(&repo, registry(), settings(4))
            .run(job_id, cancel)
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Abandoned);

        // The step stays recorded as running for the next owner to retry
        let state = repo.state(job_id);
        assert_eq!(state.job.status, JobStatus::Running);
        assert_eq!(final_statuses(&repo, job_id)["a"], StepStatus::Running);
    }
}
