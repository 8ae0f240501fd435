//! Core domain types
//!
//! This module contains the core domain structures used across Relay services.
//! These types are shared between the orchestrator (which persists them) and
//! the runner (which drives them through the executor).

pub mod job;
pub mod plan;
pub mod step;
