//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;
pub mod worker;

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    routing::{get, post, put},
};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// Agents an explicitly submitted plan may reference
    pub agents: Arc<HashSet<String>>,
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Public job endpoints
        .route("/run", post(job::submit_job))
        .route("/status/{id}", get(job::get_status))
        .route("/plan/{id}", get(job::get_plan))
        .route("/results/{id}", get(job::get_results))
        .route("/job/{id}/cancel", post(job::cancel_job))
        .route("/jobs", get(job::list_jobs))
        // Worker endpoints
        .route("/worker/claim", post(worker::claim_job))
        .route("/worker/jobs/{id}/lease", post(worker::renew_lease))
        .route("/worker/jobs/{id}/release", post(worker::release_job))
        .route("/worker/jobs/{id}/state", get(worker::execution_state))
        .route("/worker/jobs/{id}/plan", put(worker::save_plan))
        .route("/worker/jobs/{id}/transitions", post(worker::record_transition))
        .route("/worker/jobs/{id}/finish", post(worker::finish_job))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
