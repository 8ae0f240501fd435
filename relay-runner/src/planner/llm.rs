//! Planning through a text-generation endpoint

use async_trait::async_trait;
use relay_core::domain::job::Job;
use relay_core::domain::plan::PlanStep;
use serde::Serialize;
use uuid::Uuid;

use super::{Planner, PlanningError};

#[derive(Serialize)]
struct PlanRequest<'a> {
    job_id: Uuid,
    subject_id: &'a str,
    agents: &'a [String],
}

/// Asks an external service for a plan and parses the JSON array it returns
pub struct HttpPlanner {
    url: String,
    agents: Vec<String>,
    client: reqwest::Client,
}

impl HttpPlanner {
    pub fn new(url: &str, agents: Vec<String>) -> Self {
        Self {
            url: url.to_string(),
            agents,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Planner for HttpPlanner {
    async fn plan(&self, job: &Job) -> Result<Vec<PlanStep>, PlanningError> {
        let response = self
            .client
            .post(&self.url)
            .json(&PlanRequest {
                job_id: job.id,
                subject_id: &job.subject_id,
                agents: &self.agents,
            })
            .send()
            .await
            .map_err(|e| PlanningError::Unavailable(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PlanningError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(PlanningError::Unavailable(format!(
                "{}: {}",
                status.as_u16(),
                text.trim()
            )));
        }

        tracing::debug!("Planner response for job {}: {}", job.id, text);
        parse_plan(&text)
    }
}

/// Parse a plan from model output, tolerating a Markdown code fence
pub fn parse_plan(text: &str) -> Result<Vec<PlanStep>, PlanningError> {
    let body = strip_code_fence(text.trim());
    if body.is_empty() {
        return Err(PlanningError::Malformed("empty response".to_string()));
    }

    serde_json::from_str(body).map_err(|e| PlanningError::Malformed(e.to_string()))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };

    // Drop the info string (e.g. "json") on the opening line
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };

    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
