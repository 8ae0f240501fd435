//! Relay Core
//!
//! Core types and abstractions for the Relay plan-driven pipeline engine.
//!
//! This crate contains:
//! - Domain types: Jobs, declared plan steps (intent) and executed steps (reality)
//! - Validation: structural checks a plan must pass before anything is persisted
//! - Projection: the read-time merge of intent and reality into one status view
//! - DTOs: Data transfer objects for inter-service communication

pub mod domain;
pub mod dto;
pub mod error;
pub mod projection;
pub mod validation;

pub use error::{HandlerError, InfrastructureError};
pub use validation::{AgentCatalog, PlanError, validate};
