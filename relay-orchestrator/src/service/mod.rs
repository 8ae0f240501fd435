//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories and contain domain logic.

pub mod job;
pub mod worker;

// Re-export for convenience
pub use job as job_service;
pub use worker as worker_service;

use relay_core::domain::plan::PlanStep;
use relay_core::domain::step::StepStatus;

/// Prepare submitted steps for storage
///
/// Declared status always starts at `pending`. When no step carries an
/// order hint, declaration order is used.
pub(crate) fn normalize_steps(mut steps: Vec<PlanStep>) -> Vec<PlanStep> {
    let unordered = steps.iter().all(|s| s.step_order == 0);

    for (index, step) in steps.iter_mut().enumerate() {
        step.status = StepStatus::Pending;
        if unordered {
            step.step_order = index as i32;
        }
    }

    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_assigns_declaration_order() {
        let steps = normalize_steps(vec![
            PlanStep::new("a", "internal"),
            PlanStep::new("b", "internal").depends_on(["a"]),
        ]);
        assert_eq!(steps[0].step_order, 0);
        assert_eq!(steps[1].step_order, 1);
    }

    #[test]
    fn test_normalize_keeps_explicit_order_and_resets_status() {
        let mut late = PlanStep::new("a", "internal").with_order(7);
        late.status = StepStatus::Done;

        let steps = normalize_steps(vec![late, PlanStep::new("b", "internal").with_order(3)]);
        assert_eq!(steps[0].step_order, 7);
        assert_eq!(steps[0].status, StepStatus::Pending);
        assert_eq!(steps[1].step_order, 3);
    }
}
