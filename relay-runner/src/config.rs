//! Runner configuration
//!
//! Defines all configurable parameters for the runner: orchestrator
//! connection, polling, concurrency limits, step timeouts, leases and the
//! endpoints of external agents.

use std::collections::HashMap;
use std::time::Duration;

const AGENT_URL_PREFIX: &str = "RELAY_AGENT_";
const AGENT_URL_SUFFIX: &str = "_URL";

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this runner instance, used as lease owner
    pub runner_id: String,

    /// Orchestrator base URL (e.g., "http://localhost:8080")
    pub orchestrator_url: String,

    /// How often to poll the orchestrator for new jobs
    pub poll_interval: Duration,

    /// Max jobs this runner drives at once
    pub max_parallel_jobs: usize,

    /// Max steps of one job in flight at once
    pub max_parallel_steps: usize,

    /// Handler time limit for steps that do not declare their own
    pub step_timeout: Duration,

    /// Lease length requested on claim and on every renewal
    pub lease_duration: Duration,

    /// Optional text-generation endpoint used to plan jobs
    pub planner_url: Option<String>,

    /// External agent endpoints, keyed by lower-case agent name
    pub agent_urls: HashMap<String, String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(runner_id: String, orchestrator_url: String) -> Self {
        Self {
            runner_id,
            orchestrator_url,
            poll_interval: Duration::from_secs(2),
            max_parallel_jobs: 2,
            max_parallel_steps: 4,
            step_timeout: Duration::from_secs(600),
            lease_duration: Duration::from_secs(60),
            planner_url: None,
            agent_urls: HashMap::new(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - RUNNER_ID (optional, default: random UUID)
    /// - ORCHESTRATOR_URL (required)
    /// - POLL_INTERVAL (optional, seconds, default: 2)
    /// - MAX_PARALLEL_JOBS (optional, default: 2)
    /// - MAX_PARALLEL_STEPS (optional, default: 4)
    /// - STEP_TIMEOUT (optional, seconds, default: 600)
    /// - LEASE_SECONDS (optional, default: 60)
    /// - RELAY_PLANNER_URL (optional)
    /// - RELAY_AGENT_<NAME>_URL (optional, one per external agent)
    pub fn from_env() -> anyhow::Result<Self> {
        let runner_id =
            std::env::var("RUNNER_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let orchestrator_url = std::env::var("ORCHESTRATOR_URL")
            .map_err(|_| anyhow::anyhow!("ORCHESTRATOR_URL environment variable not set"))?;

        let mut config = Self::new(runner_id, orchestrator_url);

        if let Some(secs) = env_parse::<u64>("POLL_INTERVAL") {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<usize>("MAX_PARALLEL_JOBS") {
            config.max_parallel_jobs = n;
        }
        if let Some(n) = env_parse::<usize>("MAX_PARALLEL_STEPS") {
            config.max_parallel_steps = n;
        }
        if let Some(secs) = env_parse::<u64>("STEP_TIMEOUT") {
            config.step_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("LEASE_SECONDS") {
            config.lease_duration = Duration::from_secs(secs);
        }

        config.planner_url = std::env::var("RELAY_PLANNER_URL")
            .ok()
            .filter(|s| !s.is_empty());
        config.agent_urls = agent_urls_from(std::env::vars());

        Ok(config)
    }

    /// Registers an external agent endpoint
    #[cfg(test)]
    pub fn with_agent(mut self, name: &str, url: &str) -> Self {
        self.agent_urls.insert(name.to_lowercase(), url.to_string());
        self
    }

    /// Interval between lease renewals
    pub fn lease_renewal_interval(&self) -> Duration {
        self.lease_duration / 3
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runner_id.is_empty() {
            anyhow::bail!("runner_id cannot be empty");
        }

        if !is_http_url(&self.orchestrator_url) {
            anyhow::bail!("orchestrator_url must start with http:// or https://");
        }

        if self.poll_interval.as_secs() == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.max_parallel_steps == 0 {
            anyhow::bail!("max_parallel_steps must be greater than 0");
        }

        if self.step_timeout.as_secs() == 0 {
            anyhow::bail!("step_timeout must be greater than 0");
        }

        if self.lease_duration.as_secs() < 3 {
            anyhow::bail!("lease_duration must be at least 3 seconds");
        }

        if let Some(url) = &self.planner_url {
            if !is_http_url(url) {
                anyhow::bail!("planner url must start with http:// or https://");
            }
        }

        for (agent, url) in &self.agent_urls {
            if !is_http_url(url) {
                anyhow::bail!("url of agent '{}' must start with http:// or https://", agent);
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:8080".to_string(),
        )
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Collect `RELAY_AGENT_<NAME>_URL` pairs into `name -> url`
fn agent_urls_from(vars: impl Iterator<Item = (String, String)>) -> HashMap<String, String> {
    vars.filter_map(|(key, value)| {
        let name = key
            .strip_prefix(AGENT_URL_PREFIX)?
            .strip_suffix(AGENT_URL_SUFFIX)?;
        if name.is_empty() || value.is_empty() {
            return None;
        }
        Some((name.to_lowercase(), value))
    })
    .collect()
}
