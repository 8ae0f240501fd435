//! Job poller
//!
//! Claims jobs from the orchestrator queue and executes them. Each claimed
//! job runs in its own task next to a lease keeper; losing the lease cancels
//! the execution so a second runner never writes alongside this one.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use relay_client::{ClientError, OrchestratorClient};
use relay_core::domain::job::Job;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::service::{Executor, JobOutcome};

/// Job poller that continuously claims and executes jobs
pub struct JobPoller {
    config: Config,
    client: Arc<OrchestratorClient>,
    executor: Arc<Executor>,
    semaphore: Arc<Semaphore>,
}

impl JobPoller {
    pub fn new(config: Config, client: Arc<OrchestratorClient>, executor: Arc<Executor>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_jobs));
        Self {
            config,
            client,
            executor,
            semaphore,
        }
    }

    /// Starts the polling loop
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting job poller (interval: {:?}, max parallel jobs: {})",
            self.config.poll_interval, self.config.max_parallel_jobs
        );

        let mut interval = time::interval(self.config.poll_interval);

        loop {
            interval.tick().await;

            match self.claim_available().await {
                Ok(claimed) => {
                    if claimed > 0 {
                        info!("Claimed {} job(s) this cycle", claimed);
                    }
                }
                Err(e) => {
                    error!("Error during poll cycle: {:#}", e);
                }
            }
        }
    }

    /// Claims jobs while execution slots are free
    async fn claim_available(&self) -> Result<usize> {
        let mut claimed = 0;

        loop {
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                debug!("Max parallel jobs reached, not claiming");
                break;
            };

            let claimed_at = time::Instant::now();
            let job = self
                .client
                .claim_job(&self.config.runner_id, self.config.lease_duration.as_secs())
                .await
                .context("Failed to claim job")?;

            let Some(job) = job else {
                debug!("No jobs available");
                break;
            };

            info!("Claimed job {} for {}", job.id, job.subject_id);
            self.spawn_job_task(job, claimed_at, permit);
            claimed += 1;
        }

        Ok(claimed)
    }

    /// Spawns a task to execute a single job
    fn spawn_job_task(&self, job: Job, claimed_at: time::Instant, permit: OwnedSemaphorePermit) {
        let client = Arc::clone(&self.client);
        let executor = Arc::clone(&self.executor);
        let config = self.config.clone();

        tokio::spawn(async move {
            Self::execute_job(job.id, claimed_at, config, client, executor).await;
            drop(permit);
        });
    }

    async fn execute_job(
        job_id: Uuid,
        claimed_at: time::Instant,
        config: Config,
        client: Arc<OrchestratorClient>,
        executor: Arc<Executor>,
    ) {
        let cancel = CancellationToken::new();
        let lease_keeper = Self::spawn_lease_keeper(
            job_id,
            claimed_at,
            &config,
            Arc::clone(&client),
            cancel.clone(),
        );

        let result = executor.run(job_id, cancel.clone()).await;

        cancel.cancel();
        lease_keeper.abort();

        match result {
            Ok(JobOutcome::Completed) => info!("Job {} completed", job_id),
            Ok(JobOutcome::Failed) => info!("Job {} failed", job_id),
            Ok(JobOutcome::Abandoned) => warn!("Job {} abandoned after losing its lease", job_id),
            Err(e) if e.is_conflict() => {
                warn!("Job {} was taken from this runner: {}", job_id, e);
            }
            Err(e) => {
                error!("Execution of job {} interrupted: {}", job_id, e);
                // Hand the job back so another attempt can resume it
                if let Err(e) = client.release_job(job_id, &config.runner_id).await {
                    warn!("Failed to release job {}: {}", job_id, e);
                }
            }
        }
    }

    /// Renews the lease until cancelled; cancels the token once it is lost
    fn spawn_lease_keeper(
        job_id: Uuid,
        claimed_at: time::Instant,
        config: &Config,
        client: Arc<OrchestratorClient>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let runner_id = config.runner_id.clone();
        let lease = config.lease_duration;
        let every = config.lease_renewal_interval();

        tokio::spawn(async move {
            let renew = || {
                let client = Arc::clone(&client);
                let runner_id = runner_id.clone();
                async move { client.renew_lease(job_id, &runner_id, lease.as_secs()).await }
            };
            keep_lease(job_id, lease, every, renew, cancel, claimed_at).await;
        })
    }
}

/// Renewal loop behind the lease keeper
///
/// `last_ok` is when the orchestrator last confirmed the lease. Transient
/// failures are retried only while the lease can still be renewed in time;
/// once the next attempt would land after expiry the token is cancelled,
/// since another runner may already have reclaimed the job.
async fn keep_lease<F, Fut>(
    job_id: Uuid,
    lease: Duration,
    every: Duration,
    mut renew: F,
    cancel: CancellationToken,
    mut last_ok: time::Instant,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ClientError>>,
{
    let mut ticker = time::interval_at(time::Instant::now() + every, every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        debug!("Renewing lease on job {}", job_id);
        let attempted_at = time::Instant::now();

        match renew().await {
            Ok(()) => last_ok = attempted_at,
            Err(e) if e.is_conflict() || e.is_not_found() => {
                warn!("Lost lease on job {}: {}", job_id, e);
                cancel.cancel();
                return;
            }
            Err(e) if last_ok.elapsed() + every >= lease => {
                error!(
                    "Lease on job {} expires before it can be renewed, giving it up: {}",
                    job_id, e
                );
                cancel.cancel();
                return;
            }
            Err(e) => {
                warn!("Failed to renew lease on job {}: {}", job_id, e);
            }
        }
    }
}

/// Waits for the orchestrator to answer before polling starts
///
/// Covers the case where the orchestrator is still starting up when the
/// runner does (common in container environments).
pub async fn wait_for_orchestrator(client: &OrchestratorClient) -> Result<()> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match client.health().await {
            Ok(()) => {
                if attempt > 1 {
                    info!("Orchestrator reachable after {} attempt(s)", attempt);
                }
                return Ok(());
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    return Err(anyhow::anyhow!(
                        "Orchestrator unreachable after {} attempts: {}",
                        MAX_RETRIES,
                        e
                    ));
                }

                warn!(
                    "Orchestrator not reachable (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}
