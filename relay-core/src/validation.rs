//! Plan validation
//!
//! A plan is rejected wholesale, before anything is persisted, unless it is
//! non-empty, has unique step names, resolves every dependency, binds every
//! step to a known agent and is acyclic.

use std::collections::HashSet;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;
use thiserror::Error;

use crate::domain::plan::Plan;

/// Structural problems that make a plan unexecutable
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,

    #[error("duplicate step '{0}'")]
    DuplicateStep(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    DanglingDependency { step: String, dependency: String },

    #[error("step '{step}' is bound to unknown agent '{agent}'")]
    UnknownAgent { step: String, agent: String },

    #[error("dependency cycle between steps: {}", steps.join(", "))]
    Cycle { steps: Vec<String> },

    #[error("step '{step}' has invalid timeout of {seconds} seconds")]
    InvalidTimeout { step: String, seconds: u64 },
}

/// Largest per-step timeout a plan may declare
pub const MAX_STEP_TIMEOUT_SECS: u64 = i64::MAX as u64;

/// Source of truth for which agent names can execute steps
pub trait AgentCatalog {
    fn has_agent(&self, agent: &str) -> bool;
}

impl AgentCatalog for HashSet<String> {
    fn has_agent(&self, agent: &str) -> bool {
        self.contains(agent)
    }
}

impl<const N: usize> AgentCatalog for [&str; N] {
    fn has_agent(&self, agent: &str) -> bool {
        self.contains(&agent)
    }
}

/// Validate a plan against the available agents
pub fn validate<C>(plan: &Plan, agents: &C) -> Result<(), PlanError>
where
    C: AgentCatalog + ?Sized,
{
    if plan.is_empty() {
        return Err(PlanError::Empty);
    }

    let mut names = HashSet::new();
    for step in &plan.steps {
        if !names.insert(step.step_name.as_str()) {
            return Err(PlanError::DuplicateStep(step.step_name.clone()));
        }
    }

    for step in &plan.steps {
        if let Some(missing) = step.depends_on.iter().find(|d| !names.contains(d.as_str())) {
            return Err(PlanError::DanglingDependency {
                step: step.step_name.clone(),
                dependency: missing.clone(),
            });
        }
    }

    for step in &plan.steps {
        if let Some(seconds) = step.timeout_seconds {
            if seconds == 0 || seconds > MAX_STEP_TIMEOUT_SECS {
                return Err(PlanError::InvalidTimeout {
                    step: step.step_name.clone(),
                    seconds,
                });
            }
        }
    }

    for step in &plan.steps {
        if !agents.has_agent(&step.agent) {
            return Err(PlanError::UnknownAgent {
                step: step.step_name.clone(),
                agent: step.agent.clone(),
            });
        }
    }

    topological_order(plan).map(|_| ())
}

/// Step names in an order where every dependency precedes its dependents
///
/// Assumes names are unique and dependencies resolvable; fails only on cycles.
pub fn topological_order(plan: &Plan) -> Result<Vec<String>, PlanError> {
    let graph = dependency_graph(plan);

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(_) => Err(PlanError::Cycle {
            steps: cycle_members(&graph),
        }),
    }
}

// Edges point from dependency to dependent
fn dependency_graph(plan: &Plan) -> DiGraphMap<&str, ()> {
    let mut graph = DiGraphMap::new();
    for step in &plan.steps {
        graph.add_node(step.step_name.as_str());
    }
    for step in &plan.steps {
        for dep in &step.depends_on {
            graph.add_edge(dep.as_str(), step.step_name.as_str(), ());
        }
    }
    graph
}

fn cycle_members(graph: &DiGraphMap<&str, ()>) -> Vec<String> {
    let mut members: Vec<String> = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .flatten()
        .map(str::to_string)
        .collect();
    members.sort();
    members
}
