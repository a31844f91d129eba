// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for nsx-upgrade-operator.
//!
//! These tests run without a Kubernetes cluster or an NSX manager and test
//! individual components in isolation.

mod crd_tests {
    use nsx_upgrade_operator::crd::{Condition, NsxUpgradeRunSpec, RunPhase};
    use nsx_upgrade_operator::upgrade::{HostUpgradeMode, WaitParams};

    fn minimal_spec() -> serde_json::Value {
        serde_json::json!({
            "upgradePrepareReadyId": "prepare-4.2.1",
            "manager": {
                "url": "https://nsx.example.com",
                "credentialsSecret": { "name": "nsx-admin" }
            }
        })
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(RunPhase::Pending.to_string(), "Pending");
        assert_eq!(RunPhase::Running.to_string(), "Running");
        assert_eq!(RunPhase::Completed.to_string(), "Completed");
        assert_eq!(RunPhase::PartiallyCompleted.to_string(), "PartiallyCompleted");
        assert_eq!(RunPhase::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_phase_default() {
        assert_eq!(RunPhase::default(), RunPhase::Pending);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(!RunPhase::Pending.is_terminal());
        assert!(!RunPhase::Running.is_terminal());
        assert!(RunPhase::Completed.is_terminal());
        assert!(RunPhase::PartiallyCompleted.is_terminal());
        assert!(RunPhase::Failed.is_terminal());
    }

    #[test]
    fn test_spec_defaults() {
        let spec: NsxUpgradeRunSpec = serde_json::from_value(minimal_spec()).unwrap();

        assert_eq!(spec.timeout, 3600);
        assert_eq!(spec.interval, 30);
        assert_eq!(spec.delay, 30);
        assert!(!spec.manager.insecure_skip_verify);
        assert_eq!(spec.manager.credentials_secret.username_key, "username");
        assert_eq!(spec.manager.credentials_secret.password_key, "password");
        assert!(spec.edge_groups.is_empty());
        assert!(spec.edge_upgrade_setting.is_none());

        let run = spec.to_upgrade_run();
        assert_eq!(run.wait, WaitParams::default());
        assert_eq!(run.prepare_ready_id, "prepare-4.2.1");
    }

    #[test]
    fn test_group_defaults() {
        let mut value = minimal_spec();
        value["edgeGroups"] = serde_json::json!([{ "id": "eg-1" }]);
        value["hostGroups"] = serde_json::json!([
            { "id": "hg-1", "upgradeMode": "in_place" },
            { "id": "hg-2", "enabled": false, "parallel": false }
        ]);
        let spec: NsxUpgradeRunSpec = serde_json::from_value(value).unwrap();

        assert!(spec.edge_groups[0].enabled);
        assert!(!spec.edge_groups[0].pause_after_each_upgrade_unit);

        let host = &spec.host_groups[0];
        assert!(host.enabled);
        assert!(host.parallel);
        assert!(host.rebootless_upgrade);
        assert!(!host.maintenance_mode_config_evacuate_powered_off_vms);
        assert_eq!(host.upgrade_mode, Some(HostUpgradeMode::InPlace));

        let run = spec.to_upgrade_run();
        assert!(!run.edge.is_partial());
        assert!(run.host.is_partial());
        assert!(!run.host.groups[1].parallel);
        assert_eq!(
            run.host.groups[0].host_config.as_ref().unwrap().upgrade_mode,
            Some(HostUpgradeMode::InPlace)
        );
    }

    #[test]
    fn test_settings_mapping() {
        let mut value = minimal_spec();
        value["edgeUpgradeSetting"] = serde_json::json!({ "parallel": false });
        value["hostUpgradeSetting"] =
            serde_json::json!({ "stopOnError": true, "postUpgradeCheck": false });
        let spec: NsxUpgradeRunSpec = serde_json::from_value(value).unwrap();
        let run = spec.to_upgrade_run();

        let edge = run.edge.settings.unwrap();
        assert!(!edge.parallel);
        assert!(edge.post_upgrade_check);

        let host = run.host.settings.unwrap();
        assert!(host.parallel);
        assert!(host.stop_on_error);
        assert!(!host.post_upgrade_check);
    }

    #[test]
    fn test_spec_serializes_camel_case() {
        let spec: NsxUpgradeRunSpec = serde_json::from_value(minimal_spec()).unwrap();
        let wire = serde_json::to_value(&spec).unwrap();
        assert_eq!(wire["upgradePrepareReadyId"], "prepare-4.2.1");
        assert_eq!(wire["manager"]["credentialsSecret"]["usernameKey"], "username");
        assert!(wire.get("edgeGroups").is_none());
    }

    #[test]
    fn test_condition_ready() {
        let condition = Condition::ready(true, "UpgradeCompleted", "All components upgraded", Some(1));
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason, "UpgradeCompleted");
        assert_eq!(condition.observed_generation, Some(1));
        assert!(condition.is_true());
    }

    #[test]
    fn test_condition_degraded() {
        let condition = Condition::degraded(false, "Running", "Upgrade in progress", None);
        assert_eq!(condition.r#type, "Degraded");
        assert_eq!(condition.status, "False");
        assert!(!condition.is_true());
    }
}

mod state_machine_tests {
    use nsx_upgrade_operator::controller::run_state_machine::{
        RunEvent, RunStateMachine, RunTransitionContext, start_event,
    };
    use nsx_upgrade_operator::crd::RunPhase;

    #[test]
    fn test_valid_events_from_pending() {
        let sm = RunStateMachine::new();
        let ctx = RunTransitionContext::default();
        assert_eq!(
            sm.transition(RunPhase::Pending, RunEvent::Started, &ctx)
                .map(|t| t.to),
            Some(RunPhase::Running)
        );
        assert_eq!(
            sm.transition(RunPhase::Pending, RunEvent::ValidationFailed, &ctx)
                .map(|t| t.to),
            Some(RunPhase::Failed)
        );
        // Nothing ran yet, so nothing can have succeeded
        assert!(
            sm.transition(RunPhase::Pending, RunEvent::AllComponentsSucceeded, &ctx)
                .is_none()
        );
    }

    #[test]
    fn test_running_outcomes() {
        let sm = RunStateMachine::new();
        let whole = RunTransitionContext::default();
        let partial = RunTransitionContext {
            partial_components: 1,
        };

        assert_eq!(
            sm.transition(RunPhase::Running, RunEvent::AllComponentsSucceeded, &whole)
                .map(|t| t.to),
            Some(RunPhase::Completed)
        );
        assert_eq!(
            sm.transition(RunPhase::Running, RunEvent::PartialUpgrade, &partial)
                .map(|t| t.to),
            Some(RunPhase::PartiallyCompleted)
        );
        assert_eq!(
            sm.transition(RunPhase::Running, RunEvent::RunFailed, &whole)
                .map(|t| t.to),
            Some(RunPhase::Failed)
        );
    }

    #[test]
    fn test_guards_reject_mismatched_outcome() {
        let sm = RunStateMachine::new();
        let partial = RunTransitionContext {
            partial_components: 2,
        };
        assert!(
            sm.transition(RunPhase::Running, RunEvent::AllComponentsSucceeded, &partial)
                .is_none()
        );
        assert!(
            sm.transition(
                RunPhase::Running,
                RunEvent::PartialUpgrade,
                &RunTransitionContext::default()
            )
            .is_none()
        );
    }

    #[test]
    fn test_terminal_phases_reenter_on_spec_change() {
        let sm = RunStateMachine::new();
        let ctx = RunTransitionContext::default();
        for phase in [
            RunPhase::Completed,
            RunPhase::PartiallyCompleted,
            RunPhase::Failed,
        ] {
            assert_eq!(start_event(phase), RunEvent::SpecChanged);
            assert_eq!(
                sm.transition(phase, RunEvent::SpecChanged, &ctx).map(|t| t.to),
                Some(RunPhase::Running),
                "{} should re-enter",
                phase
            );
            assert!(sm.transition(phase, RunEvent::RunFailed, &ctx).is_none());
        }
    }

    #[test]
    fn test_resume_after_restart() {
        let sm = RunStateMachine::new();
        assert_eq!(start_event(RunPhase::Running), RunEvent::Started);
        assert_eq!(
            sm.transition(
                RunPhase::Running,
                RunEvent::Started,
                &RunTransitionContext::default()
            )
            .map(|t| t.to),
            Some(RunPhase::Running)
        );
    }

    #[test]
    fn test_validation_failure_from_every_phase() {
        let sm = RunStateMachine::new();
        for phase in RunPhase::ALL {
            assert!(
                sm.can_transition(phase, RunPhase::Failed),
                "{} cannot fail",
                phase
            );
        }
    }
}

mod error_tests {
    use nsx_upgrade_operator::controller::error::Error;
    use nsx_upgrade_operator::upgrade::{
        Component, Operation, RemoteError, StatusDetail, UpgradeError, UpgradeStatus,
    };
    use nsx_upgrade_operator::upgrade::types::StatusSet;
    use std::time::Duration;

    #[test]
    fn test_error_is_retryable() {
        let kube_err = Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "timeout".to_string(),
            reason: "Timeout".to_string(),
            code: 504,
        }));
        assert!(kube_err.is_retryable());

        let validation_err = Error::Validation("invalid spec".to_string());
        assert!(!validation_err.is_retryable());

        let transient_err = Error::Transient("credentials secret not found".to_string());
        assert!(transient_err.is_retryable());
    }

    #[test]
    fn test_upgrade_errors_classified() {
        let timeout = Error::Upgrade(UpgradeError::WaitTimeout {
            component: Some(Component::Host),
            target: StatusSet::new([UpgradeStatus::Success]),
            timeout: Duration::from_secs(3600),
            last: Some(StatusDetail::new(UpgradeStatus::InProgress, "")),
        });
        assert!(timeout.is_retryable());

        let rejected = Error::Upgrade(UpgradeError::Remote {
            operation: Operation::GroupUpdate,
            component: Some(Component::Edge),
            target: Some("eg-1".to_string()),
            source: RemoteError::Api {
                status: 400,
                message: "bad request".to_string(),
            },
        });
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let err = Error::Transient("busy".to_string());
        let first = err.requeue_after_with_retry_count(0);
        let second = err.requeue_after_with_retry_count(1);
        assert!(second > first);
        assert_eq!(
            err.requeue_after_with_retry_count(30),
            Duration::from_secs(300)
        );
    }
}

mod status_tests {
    use nsx_upgrade_operator::controller::status::{
        ConditionBuilder, compute_run_conditions, get_condition_reason, is_condition_true,
    };
    use nsx_upgrade_operator::crd::{Condition, RunPhase};

    #[test]
    fn test_condition_builder() {
        let mut builder = ConditionBuilder::new();
        builder.ready(true, "UpgradeCompleted", "Done", Some(1));
        builder.progressing(false, "UpgradeCompleted", "Done", Some(1));
        let conditions = builder.build();

        assert_eq!(conditions.len(), 2);
        assert!(is_condition_true(&conditions, "Ready"));
        assert!(!is_condition_true(&conditions, "Progressing"));
    }

    #[test]
    fn test_condition_builder_updates_existing() {
        let mut builder = ConditionBuilder::new();
        builder.ready(false, "Running", "Upgrade in progress", Some(1));
        builder.ready(true, "UpgradeCompleted", "All components upgraded", Some(1));
        let conditions = builder.build();

        assert_eq!(conditions.len(), 1);
        assert!(is_condition_true(&conditions, "Ready"));
    }

    #[test]
    fn test_is_condition_true_missing() {
        let conditions: Vec<Condition> = vec![];
        assert!(!is_condition_true(&conditions, "Ready"));
    }

    #[test]
    fn test_run_conditions_per_phase() {
        let completed = compute_run_conditions(RunPhase::Completed, None, Some(2));
        assert!(is_condition_true(&completed, "Ready"));
        assert!(!is_condition_true(&completed, "Degraded"));

        let running = compute_run_conditions(RunPhase::Running, None, Some(2));
        assert!(is_condition_true(&running, "Progressing"));
        assert!(!is_condition_true(&running, "Ready"));

        let partial = compute_run_conditions(RunPhase::PartiallyCompleted, None, Some(2));
        assert!(is_condition_true(&partial, "Degraded"));
        assert_eq!(get_condition_reason(&partial, "Degraded"), Some("PartialUpgrade"));

        let failed = compute_run_conditions(
            RunPhase::Failed,
            Some("PlanUpgrade failed for MP: HTTP 500"),
            Some(2),
        );
        assert!(is_condition_true(&failed, "Degraded"));
        assert_eq!(get_condition_reason(&failed, "Ready"), Some("RunFailed"));
        assert!(
            failed
                .iter()
                .any(|c| c.message == "PlanUpgrade failed for MP: HTTP 500")
        );
    }
}

mod host_config_tests {
    use nsx_upgrade_operator::upgrade::types::{
        ExtendedConfig, HOST_CONFIG_KEYS, REBOOTLESS_UPGRADE_KEY, UPGRADE_MODE_KEY, VSAN_MODE_KEY,
    };
    use nsx_upgrade_operator::upgrade::{HostUpgradeConfig, HostUpgradeMode, VsanMode};

    #[test]
    fn test_apply_replaces_owned_keys_only() {
        let mut bag: ExtendedConfig = [
            (UPGRADE_MODE_KEY.to_string(), "maintenance_mode".to_string()),
            (VSAN_MODE_KEY.to_string(), "no_action".to_string()),
            ("custom_key".to_string(), "kept".to_string()),
        ]
        .into_iter()
        .collect();

        HostUpgradeConfig {
            upgrade_mode: Some(HostUpgradeMode::InPlace),
            ..Default::default()
        }
        .apply_to(&mut bag);

        assert_eq!(bag.get(UPGRADE_MODE_KEY), Some("in_place"));
        // Unset modes are removed, not left stale
        assert_eq!(bag.get(VSAN_MODE_KEY), None);
        assert_eq!(bag.get("custom_key"), Some("kept"));
        assert_eq!(bag.get(REBOOTLESS_UPGRADE_KEY), Some("true"));
    }

    #[test]
    fn test_full_record_encodes_every_key() {
        let bag = HostUpgradeConfig {
            upgrade_mode: Some(HostUpgradeMode::MaintenanceMode),
            vsan_mode: Some(VsanMode::EnsureObjectAccessibility),
            evacuate_powered_off_vms: true,
            rebootless_upgrade: false,
        }
        .to_extended_config();

        for key in HOST_CONFIG_KEYS {
            assert!(bag.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(bag.get(VSAN_MODE_KEY), Some("ensure_object_accessibility"));
    }
}
