//! Data Transfer Objects for inter-service communication
//!
//! DTOs used between the orchestrator, runners and the CLI. Public API shapes
//! live in `job` and `plan`; the runner-facing queue and transition protocol
//! lives in `worker`.

pub mod job;
pub mod plan;
pub mod worker;
