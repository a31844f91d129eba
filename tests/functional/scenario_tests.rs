//! End-to-end upgrade run scenarios.
//!
//! Each test builds a fabric, runs the driver to completion on paused time,
//! and checks the resulting call log and report.

use std::time::Duration;

use tokio::time::Instant;

use crate::mock_fabric::{Call, MockFabric, Step, standard_fabric, steps};
use crate::{driver_for, standard_run};
use nsx_upgrade_operator::upgrade::types::{ReorderRequest, UPGRADE_MODE_KEY};
use nsx_upgrade_operator::upgrade::{
    Component, ComponentOutcome, DeclaredGroup, DriverConfig, Operation, RemoteError,
    UpgradeDriver, UpgradeError, UpgradeStatus, WaitParams, collect_outputs,
};

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_happy_path_call_sequence() {
    let fabric = standard_fabric();
    let report = driver_for(&fabric).execute(&standard_run()).await.unwrap();

    let customizable = |c: Component, group: &str| {
        vec![
            Call::StatusGet(Some(c)),
            Call::StatusGet(None),
            Call::Reset(c),
            Call::GroupGet(group.to_string()),
            Call::GroupUpdate(group.to_string()),
            Call::SettingsGet(c),
            Call::SettingsUpdate(c),
            Call::Upgrade(c),
            Call::StatusGet(Some(c)),
            Call::StatusGet(Some(c)),
        ]
    };
    let mut expected = customizable(Component::Edge, "eg-1");
    expected.extend(customizable(Component::Host, "hg-1"));
    expected.extend([
        Call::StatusGet(Some(Component::Management)),
        Call::StatusGet(None),
        Call::Upgrade(Component::Management),
        Call::StatusGet(Some(Component::Management)),
        Call::StatusGet(Some(Component::Management)),
        Call::PostCheck(Component::Edge),
        Call::PostCheck(Component::Host),
    ]);
    assert_eq!(fabric.calls(), expected);

    for component in Component::ORDERED {
        assert_eq!(report.outcome(component), Some(ComponentOutcome::Completed));
        assert_eq!(fabric.status(component), Some(UpgradeStatus::Success));
    }
    assert!(!report.is_partial());
    assert_eq!(report.post_checks, vec![Component::Edge, Component::Host]);
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_outputs() {
    let fabric = standard_fabric();
    driver_for(&fabric).execute(&standard_run()).await.unwrap();

    let outputs = collect_outputs(&fabric.client_set()).await.unwrap();
    assert_eq!(outputs.upgrade_group_plan.len(), 3);

    let host_group = outputs
        .upgrade_group_plan
        .iter()
        .find(|g| g.id == "hg-1")
        .unwrap();
    assert_eq!(host_group.component_type, "HOST");
    assert_eq!(
        host_group.extended_config.get(UPGRADE_MODE_KEY).map(String::as_str),
        Some("in_place")
    );

    for component in Component::ORDERED {
        let state = outputs.component(component).unwrap();
        assert_eq!(state.status, UpgradeStatus::Success);
        assert_eq!(state.target_version.as_deref(), Some("4.2.1.0.0"));
        assert_eq!(state.group_states.len(), 1);
    }
}

// ============================================================================
// Partial upgrade
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_partial_edge_upgrade_skips_management() {
    let fabric = MockFabric::new()
        .with_group(Component::Edge, "eg-1")
        .with_group(Component::Edge, "eg-2")
        .with_group(Component::Host, "hg-1")
        .with_upgrade_script(
            Component::Edge,
            steps(&[UpgradeStatus::InProgress, UpgradeStatus::Paused]),
        );
    let mut run = standard_run();
    run.edge.groups = vec![
        DeclaredGroup::new("eg-1"),
        DeclaredGroup {
            enabled: false,
            ..DeclaredGroup::new("eg-2")
        },
    ];

    let report = driver_for(&fabric).execute(&run).await.unwrap();

    assert_eq!(
        report.outcome(Component::Edge),
        Some(ComponentOutcome::PartiallyCompleted)
    );
    assert_eq!(report.outcome(Component::Host), Some(ComponentOutcome::Completed));
    assert_eq!(
        report.outcome(Component::Management),
        Some(ComponentOutcome::Skipped)
    );
    assert!(report.is_partial());
    assert_eq!(fabric.status(Component::Edge), Some(UpgradeStatus::Paused));
    assert!(!fabric.group("eg-2").unwrap().enabled);

    assert_eq!(fabric.count(|c| *c == Call::Upgrade(Component::Host)), 1);
    assert_eq!(
        fabric.count(|c| matches!(
            c,
            Call::Upgrade(Component::Management) | Call::StatusGet(Some(Component::Management))
        )),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_pause_after_each_unit_is_partial() {
    let fabric = standard_fabric().with_upgrade_script(
        Component::Host,
        steps(&[
            UpgradeStatus::InProgress,
            UpgradeStatus::Pausing,
            UpgradeStatus::Paused,
        ]),
    );
    let mut run = standard_run();
    run.host.groups[0].pause_after_each_upgrade_unit = true;

    let report = driver_for(&fabric).execute(&run).await.unwrap();

    assert_eq!(
        report.outcome(Component::Host),
        Some(ComponentOutcome::PartiallyCompleted)
    );
    assert_eq!(
        report.outcome(Component::Management),
        Some(ComponentOutcome::Skipped)
    );
    assert!(fabric.group("hg-1").unwrap().pause_after_each_upgrade_unit);
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_resume_pauses_in_flight_edge() {
    let fabric = standard_fabric().with_status(Component::Edge, UpgradeStatus::InProgress);

    let report = driver_for(&fabric).execute(&standard_run()).await.unwrap();

    let mutations = fabric.mutations();
    assert_eq!(
        &mutations[..5],
        &[
            Call::Pause,
            Call::Reset(Component::Edge),
            Call::GroupUpdate("eg-1".to_string()),
            Call::SettingsUpdate(Component::Edge),
            Call::Upgrade(Component::Edge),
        ]
    );
    assert_eq!(fabric.count(|c| *c == Call::Pause), 1);
    assert_eq!(report.outcome(Component::Edge), Some(ComponentOutcome::Completed));
    assert_eq!(
        report.outcome(Component::Management),
        Some(ComponentOutcome::Completed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_resume_pausing_component_is_not_paused_again() {
    let fabric = standard_fabric()
        .with_status(Component::Edge, UpgradeStatus::InProgress)
        .with_script(
            Component::Edge,
            steps(&[UpgradeStatus::Pausing, UpgradeStatus::Paused]),
        );

    driver_for(&fabric).execute(&standard_run()).await.unwrap();

    assert_eq!(fabric.count(|c| *c == Call::Pause), 0);
    let calls = fabric.calls();
    let edge_reset = calls
        .iter()
        .position(|c| *c == Call::Reset(Component::Edge))
        .unwrap();
    assert_eq!(
        &calls[..edge_reset],
        &[
            Call::StatusGet(Some(Component::Edge)),
            Call::StatusGet(Some(Component::Edge)),
            Call::StatusGet(None),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_resume_waits_for_running_management() {
    let fabric = standard_fabric()
        .with_status(Component::Edge, UpgradeStatus::Success)
        .with_status(Component::Host, UpgradeStatus::Success)
        .with_status(Component::Management, UpgradeStatus::InProgress)
        .with_script(
            Component::Management,
            steps(&[
                UpgradeStatus::InProgress,
                UpgradeStatus::InProgress,
                UpgradeStatus::Success,
            ]),
        );

    let report = driver_for(&fabric).execute(&standard_run()).await.unwrap();

    assert_eq!(fabric.mutations(), Vec::<Call>::new());
    assert_eq!(
        report.outcome(Component::Management),
        Some(ComponentOutcome::Completed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_resume_waits_for_pausing_management_to_settle() {
    let fabric = standard_fabric()
        .with_status(Component::Edge, UpgradeStatus::Success)
        .with_status(Component::Host, UpgradeStatus::Success)
        .with_status(Component::Management, UpgradeStatus::Pausing)
        .with_script(
            Component::Management,
            steps(&[UpgradeStatus::Pausing, UpgradeStatus::Paused]),
        );

    let report = driver_for(&fabric).execute(&standard_run()).await.unwrap();

    assert_eq!(fabric.count(|c| *c == Call::Pause), 0);
    assert_eq!(fabric.mutations(), vec![Call::Upgrade(Component::Management)]);
    let calls = fabric.calls();
    let launch = calls
        .iter()
        .position(|c| *c == Call::Upgrade(Component::Management))
        .unwrap();
    assert_eq!(
        &calls[..launch],
        &[
            Call::StatusGet(Some(Component::Edge)),
            Call::StatusGet(Some(Component::Host)),
            Call::StatusGet(Some(Component::Management)),
            Call::StatusGet(Some(Component::Management)),
            Call::StatusGet(None),
        ]
    );
    assert_eq!(
        report.outcome(Component::Management),
        Some(ComponentOutcome::Completed)
    );
}

// ============================================================================
// Management restart window
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_management_restart_window_is_tolerated() {
    let unavailable = || Step::Fail(RemoteError::ServiceUnavailable("HTTP 503".to_string()));
    let fabric = standard_fabric().with_upgrade_script(
        Component::Management,
        vec![
            Step::Status(UpgradeStatus::InProgress),
            unavailable(),
            unavailable(),
            Step::Fail(RemoteError::Timeout("read timed out".to_string())),
            unavailable(),
            Step::Status(UpgradeStatus::Success),
        ],
    );
    let run = standard_run();

    let started = Instant::now();
    let report = driver_for(&fabric).execute(&run).await.unwrap();

    assert_eq!(
        report.outcome(Component::Management),
        Some(ComponentOutcome::Completed)
    );
    assert!(started.elapsed() <= run.wait.timeout);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_host_status_is_fatal() {
    let fabric = standard_fabric().with_upgrade_script(
        Component::Host,
        vec![Step::Fail(RemoteError::ServiceUnavailable(
            "HTTP 503".to_string(),
        ))],
    );

    let err = driver_for(&fabric)
        .execute(&standard_run())
        .await
        .unwrap_err();

    assert_eq!(err.component(), Some(Component::Host));
    assert_eq!(err.operation(), Some(Operation::StatusGet));
    assert_eq!(
        fabric.count(|c| *c == Call::Upgrade(Component::Management)),
        0
    );
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_host_group_update_failure_stops_run() {
    let fabric = standard_fabric().failing(
        Operation::GroupUpdate,
        Some("hg-1"),
        RemoteError::Api {
            status: 400,
            message: "Upgrade unit group is in use".to_string(),
        },
    );

    let err = driver_for(&fabric)
        .execute(&standard_run())
        .await
        .unwrap_err();

    assert_eq!(err.component(), Some(Component::Host));
    assert_eq!(err.operation(), Some(Operation::GroupUpdate));
    assert!(err.to_string().contains("hg-1"));
    assert_eq!(fabric.count(|c| *c == Call::Upgrade(Component::Host)), 0);
    assert_eq!(
        fabric.count(|c| matches!(
            c,
            Call::Upgrade(Component::Management) | Call::StatusGet(Some(Component::Management))
        )),
        0
    );
    assert_eq!(fabric.count(|c| matches!(c, Call::PostCheck(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_component_status_is_unexpected() {
    let fabric = standard_fabric()
        .with_detail(Component::Edge, "edge-node-2 failed pre-check")
        .with_upgrade_script(
            Component::Edge,
            steps(&[UpgradeStatus::InProgress, UpgradeStatus::Failed]),
        );

    let err = driver_for(&fabric)
        .execute(&standard_run())
        .await
        .unwrap_err();

    assert!(matches!(err, UpgradeError::UnexpectedStatus { .. }));
    let last = err.last_observed().unwrap();
    assert_eq!(last.status, UpgradeStatus::Failed);
    assert_eq!(last.detail, "edge-node-2 failed pre-check");
    assert_eq!(fabric.count(|c| *c == Call::Reset(Component::Host)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_component_status() {
    let fabric = standard_fabric().without_status_of(Component::Host);

    let err = driver_for(&fabric)
        .execute(&standard_run())
        .await
        .unwrap_err();

    assert!(matches!(err, UpgradeError::StatusNotFound(Component::Host)));
    assert_eq!(
        err.to_string(),
        "couldn't find upgrade status of HOST component"
    );
}

#[tokio::test(start_paused = true)]
async fn test_post_check_failure_is_not_fatal() {
    let fabric = standard_fabric().failing(
        Operation::PostUpgradeCheck,
        None,
        RemoteError::ServiceUnavailable("HTTP 503".to_string()),
    );

    let report = driver_for(&fabric).execute(&standard_run()).await.unwrap();

    assert!(report.post_checks.is_empty());
    assert_eq!(fabric.count(|c| matches!(c, Call::PostCheck(_))), 2);
}

#[tokio::test(start_paused = true)]
async fn test_post_check_only_when_requested() {
    let fabric = standard_fabric();
    let mut run = standard_run();
    run.edge.settings = None;
    if let Some(settings) = run.host.settings.as_mut() {
        settings.post_upgrade_check = false;
    }

    let report = driver_for(&fabric).execute(&run).await.unwrap();

    assert!(report.post_checks.is_empty());
    assert_eq!(fabric.count(|c| matches!(c, Call::PostCheck(_))), 0);
    assert_eq!(
        fabric.count(|c| *c == Call::SettingsUpdate(Component::Edge)),
        0
    );
}

// ============================================================================
// Reordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_groups_reordered_to_declared_order() {
    let fabric = MockFabric::new()
        .with_group(Component::Edge, "C")
        .with_group(Component::Edge, "A")
        .with_group(Component::Edge, "B")
        .with_group(Component::Host, "hg-1");
    let mut run = standard_run();
    run.edge.groups = vec![
        DeclaredGroup::new("A"),
        DeclaredGroup::new("B"),
        DeclaredGroup::new("C"),
    ];

    driver_for(&fabric).execute(&run).await.unwrap();

    let reorders: Vec<Call> = fabric
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::GroupReorder { .. }))
        .collect();
    assert_eq!(
        reorders,
        vec![
            Call::GroupReorder {
                id: "B".to_string(),
                request: ReorderRequest::after("A"),
            },
            Call::GroupReorder {
                id: "C".to_string(),
                request: ReorderRequest::after("B"),
            },
        ]
    );
    assert_eq!(fabric.group_order(Component::Edge), vec!["A", "B", "C"]);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_run_during_wait() {
    let fabric = standard_fabric().with_upgrade_script(
        Component::Edge,
        steps(&[UpgradeStatus::InProgress; 200]),
    );
    let driver = driver_for(&fabric);
    let cancel = driver.cancellation_handle();

    let handle = tokio::spawn(async move { driver.execute(&standard_run()).await });
    tokio::time::sleep(Duration::from_secs(600)).await;
    cancel.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.component(), Some(Component::Edge));
    assert_eq!(fabric.count(|c| *c == Call::Reset(Component::Host)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pre_cancelled_driver_issues_no_calls() {
    let fabric = standard_fabric();
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();
    let driver =
        UpgradeDriver::with_cancellation(fabric.client_set(), DriverConfig::default(), cancel);

    let err = driver.execute(&standard_run()).await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(fabric.calls().is_empty());
}

// ============================================================================
// Overall status
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_waits_for_lingering_overall_status() {
    let fabric = standard_fabric().with_overall_script(vec![
        UpgradeStatus::InProgress,
        UpgradeStatus::InProgress,
    ]);
    let mut run = standard_run();
    run.wait = WaitParams::from_secs(600, 10, 5);

    driver_for(&fabric).execute(&run).await.unwrap();

    let calls = fabric.calls();
    let first_upgrade = calls
        .iter()
        .position(|c| *c == Call::Upgrade(Component::Edge))
        .unwrap();
    let overall_before = calls[..first_upgrade]
        .iter()
        .filter(|c| **c == Call::StatusGet(None))
        .count();
    assert_eq!(overall_before, 3);
}

#[tokio::test(start_paused = true)]
async fn test_next_component_waits_for_overall_to_settle() {
    let fabric = standard_fabric().with_lingering_overall(2);
    let mut run = standard_run();
    run.wait = WaitParams::from_secs(600, 10, 5);

    driver_for(&fabric).execute(&run).await.unwrap();

    let calls = fabric.calls();
    for (previous, next) in [
        (Component::Edge, Component::Host),
        (Component::Host, Component::Management),
    ] {
        let launched = calls
            .iter()
            .position(|c| *c == Call::Upgrade(previous))
            .unwrap();
        let first_change = calls
            .iter()
            .position(|c| *c == Call::Reset(next) || *c == Call::Upgrade(next))
            .unwrap();
        let overall = calls[launched..first_change]
            .iter()
            .filter(|c| **c == Call::StatusGet(None))
            .count();
        // Two lingering IN_PROGRESS answers, then a stable one.
        assert_eq!(overall, 3, "{} started before overall settled", next);
    }
}

#[tokio::test(start_paused = true)]
async fn test_huge_timeout_runs_without_deadline() {
    let fabric = standard_fabric();
    let mut run = standard_run();
    run.wait = WaitParams::from_secs(u64::MAX, 30, 30);

    let report = driver_for(&fabric).execute(&run).await.unwrap();

    for component in Component::ORDERED {
        assert_eq!(report.outcome(component), Some(ComponentOutcome::Completed));
    }
}
