//! Status management utilities.
//!
//! Builds the Ready / Progressing / Degraded conditions of an NsxUpgradeRun
//! from its phase.

use crate::crd::{Condition, RunPhase};

/// Builder for managing conditions list
#[derive(Default)]
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the condition of the same type
    pub fn set(&mut self, condition: Condition) -> &mut Self {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    pub fn ready(
        &mut self,
        ready: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::ready(ready, reason, message, generation))
    }

    pub fn progressing(
        &mut self,
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::progressing(
            progressing,
            reason,
            message,
            generation,
        ))
    }

    pub fn degraded(
        &mut self,
        degraded: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::degraded(degraded, reason, message, generation))
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Compute the standard conditions for a run phase.
///
/// - Ready: True once every component is upgraded
/// - Progressing: True while the driver runs
/// - Degraded: True when the run failed or stopped short of MP
pub fn compute_run_conditions(
    phase: RunPhase,
    error_message: Option<&str>,
    generation: Option<i64>,
) -> Vec<Condition> {
    let mut builder = ConditionBuilder::new();
    match phase {
        RunPhase::Pending => {
            builder
                .ready(false, "Pending", "Run has not started", generation)
                .progressing(false, "Pending", "Run has not started", generation)
                .degraded(false, "Pending", "Run has not started", generation);
        }
        RunPhase::Running => {
            builder
                .ready(false, "Running", "Upgrade run in progress", generation)
                .progressing(true, "Running", "Upgrade run in progress", generation)
                .degraded(false, "Running", "Upgrade run in progress", generation);
        }
        RunPhase::Completed => {
            builder
                .ready(true, "UpgradeCompleted", "All components upgraded", generation)
                .progressing(false, "UpgradeCompleted", "All components upgraded", generation)
                .degraded(false, "UpgradeCompleted", "All components upgraded", generation);
        }
        RunPhase::PartiallyCompleted => {
            let message = "Some upgrade unit groups were not upgraded; MP upgrade skipped";
            builder
                .ready(false, "PartialUpgrade", message, generation)
                .progressing(false, "PartialUpgrade", message, generation)
                .degraded(true, "PartialUpgrade", message, generation);
        }
        RunPhase::Failed => {
            let message = error_message.unwrap_or("Upgrade run failed");
            builder
                .ready(false, "RunFailed", message, generation)
                .progressing(false, "RunFailed", message, generation)
                .degraded(true, "RunFailed", message, generation);
        }
    }
    builder.build()
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(Condition::is_true)
}

/// Get the reason for a condition
pub fn get_condition_reason<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a str> {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .map(|c| c.reason.as_str())
}
