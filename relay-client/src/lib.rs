//! Relay HTTP Client
//!
//! A type-safe HTTP client for the Relay orchestrator API.
//!
//! The CLI uses the public job endpoints (submit, poll, inspect, results);
//! runners use the worker endpoints (claim, lease, plan, transitions).
//!
//! # Example
//!
//! ```no_run
//! use relay_client::OrchestratorClient;
//! use relay_core::dto::job::SubmitJob;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let submitted = client.submit(SubmitJob {
//!         subject_id: "PROJ-123".to_string(),
//!         plan: None,
//!     }).await?;
//!
//!     println!("Submitted job: {}", submitted.job_id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
mod worker;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

/// HTTP client for the Relay orchestrator API
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Example
    /// ```
    /// use relay_client::OrchestratorClient;
    ///
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check that the orchestrator is up
    pub async fn health(&self) -> Result<()> {
        let response = self.client.get(self.url("/health")).send().await?;
        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Like `handle_response`, but `204 No Content` yields `None`
    async fn handle_optional_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<Option<T>> {
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        self.handle_response(response).await.map(Some)
    }

    /// Handle an API response that returns no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        Self::check_status(response).await.map(|_| ())
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);

        debug!("Orchestrator answered {}: {}", status, message);
        Err(ClientError::api_error(status.as_u16(), message))
    }
}
