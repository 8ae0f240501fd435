//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Subcommand;
use relay_client::OrchestratorClient;

use crate::config::Config;

/// Interval between status polls when following a job
const FOLLOW_INTERVAL: Duration = Duration::from_secs(2);

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Submit a job for a subject (e.g. a ticket id)
    Run {
        subject_id: String,

        /// JSON file with an explicit plan (an array of steps)
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Follow the job until it finishes
        #[arg(short, long)]
        follow: bool,
    },
    /// Show the stage, progress and step statuses of a job
    Status {
        /// Job ID or unambiguous prefix
        id: String,

        /// Poll until the job is no longer running
        #[arg(short, long)]
        follow: bool,
    },
    /// Show the declared plan of a job with effective step statuses
    Plan {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Show the outputs of a completed job
    Results {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Cancel a running job
    Cancel {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// List jobs, newest first
    Jobs,
}

/// Routes the command to the appropriate handler
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(config.orchestrator_url.as_str());

    match command {
        Commands::Run {
            subject_id,
            plan,
            follow,
        } => job::run(&client, subject_id, plan, follow).await,
        Commands::Status { id, follow } => job::status(&client, &id, follow).await,
        Commands::Plan { id } => job::plan(&client, &id).await,
        Commands::Results { id } => job::results(&client, &id).await,
        Commands::Cancel { id } => job::cancel(&client, &id).await,
        Commands::Jobs => job::list(&client).await,
    }
}
