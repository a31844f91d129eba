//! Custom Resource Definitions (CRDs) for nsx-upgrade-operator.
//!
//! - `NsxUpgradeRun`: Drive a staged upgrade of an NSX fabric

mod upgrade_run;

pub use upgrade_run::*;
