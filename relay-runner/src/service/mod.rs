//! Service layer
//!
//! The executor is the only component that advances a job's state. It
//! reaches the plan store through a `JobRepository`, the agents through the
//! `HandlerRegistry`, and the planner through the `Planner` trait, so every
//! collaborator can be swapped out in tests.

mod executor;

pub use executor::{Executor, ExecutorSettings, JobOutcome};
