//! Scheduler layer for the runner
//!
//! Claims queued jobs from the orchestrator, keeps their leases alive and
//! hands each one to the executor. Jobs run concurrently up to
//! `max_parallel_jobs`; steps within a job are bounded by the executor.

pub mod poller;

pub use poller::JobPoller;
