//! Controller module for nsx-upgrade-operator.
//!
//! Contains the reconciliation loop, run phase state machine, error handling,
//! status management, and validation logic.

pub mod common;
pub mod context;
pub mod error;
pub mod reconciler;
pub mod run_state_machine;
pub mod status;
pub mod validation;
