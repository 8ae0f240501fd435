//! Relay Runner
//!
//! A stateless worker that claims jobs from the orchestrator and drives
//! their plans to completion.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Handlers: One `StepHandler` per agent, looked up by name
//! - Planner: Produces a plan for jobs submitted without one
//! - Repository: The plan store, reached through the worker API
//! - Service: The executor that schedules steps and applies failure policy
//! - Scheduler: Job claiming, lease renewal and lifecycle management

mod config;
mod handler;
mod planner;
mod repository;
mod scheduler;
mod service;

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::handler::HandlerRegistry;
use crate::planner::{HttpPlanner, Planner, TemplatePlanner};
use crate::repository::{HttpJobRepository, JobRepository};
use crate::scheduler::{JobPoller, poller::wait_for_orchestrator};
use crate::service::{Executor, ExecutorSettings};
use relay_client::OrchestratorClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Relay Runner");

    let config = load_config()?;
    info!(
        "Loaded configuration: runner_id={}, orchestrator_url={}",
        config.runner_id, config.orchestrator_url
    );

    let client = Arc::new(OrchestratorClient::new(config.orchestrator_url.clone()));
    wait_for_orchestrator(&client).await?;
    info!("Orchestrator client initialized");

    let registry = Arc::new(HandlerRegistry::from_config(&config));
    info!("Registered {} agents", registry.agents().len());
    for agent in registry.agents() {
        info!("  - {}", agent);
    }

    let planner: Arc<dyn Planner> = match &config.planner_url {
        Some(url) => {
            info!("Planning jobs through {}", url);
            Arc::new(HttpPlanner::new(url, registry.agents()))
        }
        None => {
            info!("Planning jobs with the standard review pipeline");
            Arc::new(TemplatePlanner)
        }
    };

    let repository: Arc<dyn JobRepository> = Arc::new(HttpJobRepository::new(
        Arc::clone(&client),
        config.runner_id.clone(),
    ));

    let executor = Arc::new(Executor::new(
        repository,
        registry,
        planner,
        ExecutorSettings {
            max_parallel_steps: config.max_parallel_steps,
            default_step_timeout: config.step_timeout,
        },
    ));

    let poller = JobPoller::new(config.clone(), client, executor);

    info!(
        "Runner initialized (max parallel steps: {}, step timeout: {:?}, lease: {:?})",
        config.max_parallel_steps, config.step_timeout, config.lease_duration
    );

    if let Err(e) = poller.run().await {
        error!("Poller error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(_) => {
            info!("Failed to load config from environment, using defaults");
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}
