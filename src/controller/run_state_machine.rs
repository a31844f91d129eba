//! State machine for NsxUpgradeRun phase transitions.
//!
//! Phases move only through the transitions listed in [`RunStateMachine`];
//! the reconciler derives an event from what happened and asks the machine
//! for the next phase instead of assigning phases directly.

use crate::crd::RunPhase;
use crate::upgrade::{ComponentOutcome, RunReport, UpgradeError};

// ============================================================================
// Run Events
// ============================================================================

/// Events that can trigger run phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    /// The driver started executing a new generation.
    Started,

    /// Every component reached Success or was already there.
    AllComponentsSucceeded,

    /// At least one component finished in Paused by design.
    PartialUpgrade,

    /// The driver returned an error.
    RunFailed,

    /// A new spec generation arrived after the run finished.
    SpecChanged,

    /// The spec was rejected before the driver ran.
    ValidationFailed,
}

impl std::fmt::Display for RunEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunEvent::Started => write!(f, "Started"),
            RunEvent::AllComponentsSucceeded => write!(f, "AllComponentsSucceeded"),
            RunEvent::PartialUpgrade => write!(f, "PartialUpgrade"),
            RunEvent::RunFailed => write!(f, "RunFailed"),
            RunEvent::SpecChanged => write!(f, "SpecChanged"),
            RunEvent::ValidationFailed => write!(f, "ValidationFailed"),
        }
    }
}

// ============================================================================
// Transition Context
// ============================================================================

/// Context data used to evaluate transition guards.
#[derive(Debug, Clone, Default)]
pub struct RunTransitionContext {
    /// Components that finished partially in the last run.
    pub partial_components: usize,
}

impl RunTransitionContext {
    pub fn from_report(report: &RunReport) -> Self {
        Self {
            partial_components: report
                .components
                .iter()
                .filter(|c| c.outcome == ComponentOutcome::PartiallyCompleted)
                .count(),
        }
    }
}

/// Represents a single state transition.
#[derive(Debug, Clone)]
pub struct RunTransition {
    pub from: RunPhase,
    pub to: RunPhase,
    pub event: RunEvent,
    /// Human-readable description.
    pub description: &'static str,
}

// ============================================================================
// Run State Machine
// ============================================================================

/// State machine for validating NsxUpgradeRun phase transitions.
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    transitions: Vec<RunTransition>,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    /// Create a new state machine with all valid transitions.
    pub fn new() -> Self {
        let mut transitions = vec![
            // From Pending
            RunTransition {
                from: RunPhase::Pending,
                to: RunPhase::Running,
                event: RunEvent::Started,
                description: "First run of the declared plan",
            },
            RunTransition {
                from: RunPhase::Pending,
                to: RunPhase::Failed,
                event: RunEvent::ValidationFailed,
                description: "Spec rejected before any remote call",
            },
            // From Running
            RunTransition {
                from: RunPhase::Running,
                to: RunPhase::Running,
                event: RunEvent::Started,
                description: "Resume a run interrupted by an operator restart",
            },
            RunTransition {
                from: RunPhase::Running,
                to: RunPhase::Completed,
                event: RunEvent::AllComponentsSucceeded,
                description: "Every component upgraded",
            },
            RunTransition {
                from: RunPhase::Running,
                to: RunPhase::PartiallyCompleted,
                event: RunEvent::PartialUpgrade,
                description: "Declared groups left for a later run, MP skipped",
            },
            RunTransition {
                from: RunPhase::Running,
                to: RunPhase::Failed,
                event: RunEvent::RunFailed,
                description: "Run aborted on the first non-recoverable error",
            },
            RunTransition {
                from: RunPhase::Running,
                to: RunPhase::Failed,
                event: RunEvent::ValidationFailed,
                description: "Spec rejected before resuming",
            },
        ];

        // A finished run is re-entered whenever the spec changes.
        for from in [
            RunPhase::Completed,
            RunPhase::PartiallyCompleted,
            RunPhase::Failed,
        ] {
            transitions.push(RunTransition {
                from,
                to: RunPhase::Running,
                event: RunEvent::SpecChanged,
                description: "Re-enter the run with the new spec",
            });
            transitions.push(RunTransition {
                from,
                to: RunPhase::Failed,
                event: RunEvent::ValidationFailed,
                description: "New spec rejected before any remote call",
            });
        }

        Self { transitions }
    }

    /// Attempt to transition from one phase given an event.
    ///
    /// Returns the transition if valid, None otherwise.
    pub fn transition(
        &self,
        from: RunPhase,
        event: RunEvent,
        ctx: &RunTransitionContext,
    ) -> Option<RunTransition> {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == from && t.event == event)?;

        if !self.evaluate_guards(transition, ctx) {
            return None;
        }

        Some(transition.clone())
    }

    fn evaluate_guards(&self, transition: &RunTransition, ctx: &RunTransitionContext) -> bool {
        match (transition.from, transition.to) {
            (RunPhase::Running, RunPhase::PartiallyCompleted) => ctx.partial_components > 0,
            (RunPhase::Running, RunPhase::Completed) => ctx.partial_components == 0,
            _ => true,
        }
    }

    /// Check if a phase transition is valid (without guards).
    pub fn can_transition(&self, from: RunPhase, to: RunPhase) -> bool {
        if from == to {
            return true;
        }
        self.transitions
            .iter()
            .any(|t| t.from == from && t.to == to)
    }

    /// Get the list of valid next phases from a given phase.
    pub fn valid_transitions(&self, from: RunPhase) -> Vec<RunPhase> {
        self.transitions
            .iter()
            .filter(|t| t.from == from)
            .map(|t| t.to)
            .collect()
    }
}

/// Event that starts executing a generation from `phase`.
pub fn start_event(phase: RunPhase) -> RunEvent {
    if phase.is_terminal() {
        RunEvent::SpecChanged
    } else {
        RunEvent::Started
    }
}

/// Event that ends a run, derived from the driver result.
pub fn determine_run_event(result: Result<&RunReport, &UpgradeError>) -> RunEvent {
    match result {
        Err(_) => RunEvent::RunFailed,
        Ok(report) if report.is_partial() => RunEvent::PartialUpgrade,
        Ok(_) => RunEvent::AllComponentsSucceeded,
    }
}
