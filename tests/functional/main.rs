// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the upgrade run driver.
//!
//! These tests drive complete runs against an in-memory NSX fabric WITHOUT
//! requiring a manager or a Kubernetes cluster. Waits run on paused tokio
//! time, so hour-long timeouts complete instantly.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_happy_path_call_sequence
//! ```
//!
//! ## Test Categories
//!
//! - **Scenario tests**: end-to-end runs (happy path, partial upgrade, resume,
//!   management restart, remote failure, reordering)
//! - **Property tests**: ordering, quiesce discipline, Edge immutability,
//!   idempotence and timeout behavior checked against the call log

mod scenario_tests;

pub use mock_fabric::*;

use nsx_upgrade_operator::upgrade::{
    ComponentPlan, DeclaredGroup, DeclaredSettings, DriverConfig, HostUpgradeConfig,
    HostUpgradeMode, UpgradeDriver, UpgradeRun, WaitParams,
};

/// Run with one enabled group per customizable component and default settings.
pub fn standard_run() -> UpgradeRun {
    UpgradeRun {
        prepare_ready_id: "prepare-4.2.1".to_string(),
        edge: ComponentPlan {
            groups: vec![DeclaredGroup::new("eg-1")],
            settings: Some(DeclaredSettings::default()),
        },
        host: ComponentPlan {
            groups: vec![DeclaredGroup {
                host_config: Some(HostUpgradeConfig {
                    upgrade_mode: Some(HostUpgradeMode::InPlace),
                    ..Default::default()
                }),
                ..DeclaredGroup::new("hg-1")
            }],
            settings: Some(DeclaredSettings::default()),
        },
        wait: WaitParams::default(),
    }
}

pub fn driver_for(fabric: &MockFabric) -> UpgradeDriver {
    UpgradeDriver::new(fabric.client_set(), DriverConfig::default())
}
