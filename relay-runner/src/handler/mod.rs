//! Step handlers
//!
//! A handler is a pure function of (parameters, dependency outputs) to an
//! output document or a `HandlerError`. Handlers never touch the plan
//! store; the executor persists every outcome.
//!
//! The registry maps the agent names used in plans to handlers and doubles
//! as the agent catalog plans are validated against.

mod http;
mod internal;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::AgentCatalog;
use relay_core::HandlerError;
use relay_core::domain::step::Document;

use crate::config::Config;

pub use http::HttpStepHandler;
pub use internal::MergeHandler;

/// Name of the built-in data-shaping agent
pub const INTERNAL_AGENT: &str = "internal";

const AGENT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Uniform interface every agent is invoked through
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(
        &self,
        params: &Document,
        dependency_outputs: &HashMap<String, Document>,
    ) -> Result<Document, HandlerError>;
}

/// Agent name to handler mapping
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in agents plus one HTTP handler per configured agent endpoint
    ///
    /// Only connecting is bounded here; how long a call may take is the
    /// step's own timeout, enforced by the executor.
    pub fn from_config(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(AGENT_CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();

        let mut registry = Self::new().with(INTERNAL_AGENT, MergeHandler);

        for (agent, url) in &config.agent_urls {
            registry = registry.with(
                agent,
                HttpStepHandler::with_client(agent, url, client.clone()),
            );
        }

        registry
    }

    /// Register (or replace) the handler for an agent
    pub fn with(mut self, agent: &str, handler: impl StepHandler + 'static) -> Self {
        self.handlers.insert(agent.to_string(), Arc::new(handler));
        self
    }

    pub fn get(&self, agent: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(agent).cloned()
    }

    /// Registered agent names, sorted
    pub fn agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = self.handlers.keys().cloned().collect();
        agents.sort();
        agents
    }
}

impl AgentCatalog for HandlerRegistry {
    fn has_agent(&self, agent: &str) -> bool {
        self.handlers.contains_key(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_from_config() {
        let config = Config::default()
            .with_agent("jira", "http://jira:9000")
            .with_agent("slack", "http://slack:9000");

        let registry = HandlerRegistry::from_config(&config);
        assert_eq!(registry.agents(), vec!["internal", "jira", "slack"]);
        assert!(registry.has_agent("jira"));
        assert!(!registry.has_agent("vision"));
        assert!(registry.get("internal").is_some());
    }
}
