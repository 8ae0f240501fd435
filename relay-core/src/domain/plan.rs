//! Plan domain types
//!
//! A plan is the declared graph of steps for one job. Each step is bound to
//! an agent (the handler that executes it), carries an opaque parameter
//! document, names the steps it depends on, and is either critical or not.

use serde::{Deserialize, Serialize};

use crate::domain::step::{Document, StepStatus};

/// One declared node of a plan (intent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_name: String,
    #[serde(default)]
    pub step_order: i32,
    pub agent: String,
    /// Human-readable stage label; falls back to the step name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default = "empty_params")]
    pub params: Document,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub critical: bool,
    /// Overrides the runner's default step timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub status: StepStatus,
}

fn empty_params() -> Document {
    Document::Object(Default::default())
}

impl PlanStep {
    pub fn new(step_name: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            step_order: 0,
            agent: agent.into(),
            label: None,
            params: empty_params(),
            depends_on: Vec::new(),
            critical: false,
            timeout_seconds: None,
            status: StepStatus::Pending,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_params(mut self, params: Document) -> Self {
        self.params = params;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.step_order = order;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.step_name)
    }
}

/// The ordered list of declared steps for one job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.step_name == name)
    }

    /// Steps sorted by their order hint, ties broken by declaration order
    pub fn ordered(&self) -> Vec<&PlanStep> {
        let mut steps: Vec<&PlanStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.step_order);
        steps
    }
}
