//! ID resolver module
//!
//! Lets users name a job by a short, unambiguous prefix of its UUID instead
//! of the full identifier.

use anyhow::{Context, Result, anyhow};
use relay_client::OrchestratorClient;
use uuid::Uuid;

/// Resolve a job ID or prefix to a full UUID
///
/// A full UUID is returned as is; anything else is matched against the ids
/// of all known jobs.
pub async fn resolve_job_id(client: &OrchestratorClient, input: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(input) {
        return Ok(uuid);
    }

    let jobs = client
        .list_jobs()
        .await
        .context("Failed to fetch jobs for ID resolution")?;

    match_prefix(input, jobs.iter().map(|j| j.id))
}

fn match_prefix(input: &str, ids: impl Iterator<Item = Uuid>) -> Result<Uuid> {
    let prefix = input.to_lowercase();
    if prefix.is_empty() {
        return Err(anyhow!("Job ID cannot be empty"));
    }

    let matches: Vec<Uuid> = ids
        .filter(|id| id.to_string().starts_with(&prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No job found with ID starting with '{}'", prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple jobs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
