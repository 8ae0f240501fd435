//! External agents reached over HTTP

use std::collections::HashMap;

use async_trait::async_trait;
use relay_core::HandlerError;
use relay_core::domain::step::Document;
use serde::Serialize;

use super::StepHandler;

#[derive(Serialize)]
struct AgentRequest<'a> {
    params: &'a Document,
    dependency_outputs: &'a HashMap<String, Document>,
}

/// Posts `{params, dependency_outputs}` to an agent and returns its JSON reply
pub struct HttpStepHandler {
    agent: String,
    url: String,
    client: reqwest::Client,
}

impl HttpStepHandler {
    pub fn with_client(agent: &str, url: &str, client: reqwest::Client) -> Self {
        Self {
            agent: agent.to_string(),
            url: url.to_string(),
            client,
        }
    }
}

#[async_trait]
impl StepHandler for HttpStepHandler {
    async fn handle(
        &self,
        params: &Document,
        dependency_outputs: &HashMap<String, Document>,
    ) -> Result<Document, HandlerError> {
        let response = self
            .client
            .post(&self.url)
            .json(&AgentRequest {
                params,
                dependency_outputs,
            })
            .send()
            .await
            .map_err(|e| HandlerError::failed(format!("{} agent unreachable: {}", self.agent, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HandlerError::failed(format!(
                "{} agent returned {}: {}",
                self.agent,
                status.as_u16(),
                body.trim()
            )));
        }

        response.json::<Document>().await.map_err(|e| {
            HandlerError::failed(format!("{} agent sent invalid JSON: {}", self.agent, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_agent_is_handler_failure() {
        // Port 9 (discard) on localhost is not expected to accept connections
        let handler = HttpStepHandler::with_client("jira", "http://127.0.0.1:9/handle", reqwest::Client::new());
        let err = handler
            .handle(&serde_json::json!({}), &HashMap::new())
            .await
            .unwrap_err();

        match err {
            HandlerError::Failed(msg) => assert!(msg.starts_with("jira agent unreachable")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_request_shape() {
        let params = serde_json::json!({ "ticket": "PROJ-1" });
        let deps = HashMap::from([("jira_fetch".to_string(), serde_json::json!({ "ok": true }))]);
        let body = serde_json::to_value(AgentRequest {
            params: &params,
            dependency_outputs: &deps,
        })
        .unwrap();

        assert_eq!(body["params"]["ticket"], "PROJ-1");
        assert_eq!(body["dependency_outputs"]["jira_fetch"]["ok"], true);
    }
}
