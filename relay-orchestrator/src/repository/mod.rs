//! Repository Module
//!
//! Data access layer for the orchestrator.
//! Each repository handles database operations for a specific domain entity.

pub mod job;
pub mod plan;
pub mod step;

// Re-export for convenience
pub use job as job_repository;
pub use plan as plan_repository;
pub use step as step_repository;
