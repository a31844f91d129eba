//! NsxUpgradeRun Custom Resource Definition.
//!
//! One NsxUpgradeRun drives the upgrade plan of one NSX manager through the
//! Edge, Host and management plane components, applying the declared group
//! configuration, group order and plan settings before each component starts.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::upgrade::output::{ComponentState, GroupPlanEntry};
use crate::upgrade::types::{
    ComponentPlan, DEFAULT_DELAY_SECS, DEFAULT_INTERVAL_SECS, DEFAULT_TIMEOUT_SECS, DeclaredGroup,
    DeclaredSettings, HostUpgradeConfig, HostUpgradeMode, UpgradeRun, VsanMode, WaitParams,
};

// ============================================================================
// NsxUpgradeRun CRD
// ============================================================================

/// NsxUpgradeRun orchestrates a staged upgrade of an NSX fabric.
///
/// Example:
/// ```yaml
/// apiVersion: nsx-upgrade.smoketurner.com/v1alpha1
/// kind: NsxUpgradeRun
/// metadata:
///   name: fabric-upgrade
/// spec:
///   upgradePrepareReadyId: prepare-4.2.1
///   manager:
///     url: https://nsx.example.com
///     credentialsSecret:
///       name: nsx-admin
///   edgeGroups:
///     - id: 5c1ae9d8-edge-group
///   hostGroups:
///     - id: 71d2bd4e-host-group
///       upgradeMode: in_place
///     - id: 9a04c1f7-host-group
///       enabled: false
///   hostUpgradeSetting:
///     stopOnError: true
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "nsx-upgrade.smoketurner.com",
    version = "v1alpha1",
    kind = "NsxUpgradeRun",
    plural = "nsxupgraderuns",
    shortname = "nur",
    status = "NsxUpgradeRunStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Manager","type":"string","jsonPath":".spec.manager.url"}"#,
    printcolumn = r#"{"name":"Last Run","type":"date","jsonPath":".status.lastRunAt"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NsxUpgradeRunSpec {
    /// ID of the upgrade preparation this run belongs to. Immutable.
    pub upgrade_prepare_ready_id: String,

    /// NSX manager to drive.
    pub manager: ManagerReference,

    /// Edge upgrade unit groups, in the order they should be upgraded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edge_groups: Vec<EdgeGroup>,

    /// Host upgrade unit groups, in the order they should be upgraded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_groups: Vec<HostGroup>,

    /// Edge upgrade plan settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_upgrade_setting: Option<EdgeUpgradeSetting>,

    /// Host upgrade plan settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_upgrade_setting: Option<HostUpgradeSetting>,

    /// Upgrade status check timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Interval between upgrade status checks in seconds.
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Delay before the first upgrade status check in seconds.
    #[serde(default = "default_delay")]
    pub delay: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_delay() -> u64 {
    DEFAULT_DELAY_SECS
}

fn default_true() -> bool {
    true
}

/// Location and credentials of an NSX manager.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagerReference {
    /// Manager base URL.
    pub url: String,

    /// Secret holding the manager credentials.
    pub credentials_secret: CredentialsSecretRef,

    /// Skip TLS certificate verification.
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Reference to a Secret with username and password keys.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsSecretRef {
    pub name: String,

    #[serde(default = "default_username_key")]
    pub username_key: String,

    #[serde(default = "default_password_key")]
    pub password_key: String,
}

fn default_username_key() -> String {
    "username".to_string()
}

fn default_password_key() -> String {
    "password".to_string()
}

/// Declared state of an Edge upgrade unit group.
///
/// Edge groups always keep their remote `parallel` setting.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EdgeGroup {
    pub id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub pause_after_each_upgrade_unit: bool,
}

/// Declared state of a Host upgrade unit group.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostGroup {
    pub id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub parallel: bool,

    #[serde(default)]
    pub pause_after_each_upgrade_unit: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_mode: Option<HostUpgradeMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_mode_config_vsan_mode: Option<VsanMode>,

    #[serde(default)]
    pub maintenance_mode_config_evacuate_powered_off_vms: bool,

    #[serde(default = "default_true")]
    pub rebootless_upgrade: bool,
}

/// Edge upgrade plan settings. Edge always pauses on error.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EdgeUpgradeSetting {
    /// Trigger post-upgrade checks once the run finishes.
    #[serde(default = "default_true")]
    pub post_upgrade_check: bool,

    #[serde(default = "default_true")]
    pub parallel: bool,
}

/// Host upgrade plan settings.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostUpgradeSetting {
    #[serde(default = "default_true")]
    pub post_upgrade_check: bool,

    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Pause the upgrade when an error occurs.
    #[serde(default)]
    pub stop_on_error: bool,
}

impl From<&EdgeGroup> for DeclaredGroup {
    fn from(group: &EdgeGroup) -> Self {
        Self {
            id: group.id.clone(),
            enabled: group.enabled,
            parallel: true,
            pause_after_each_upgrade_unit: group.pause_after_each_upgrade_unit,
            host_config: None,
        }
    }
}

impl From<&HostGroup> for DeclaredGroup {
    fn from(group: &HostGroup) -> Self {
        Self {
            id: group.id.clone(),
            enabled: group.enabled,
            parallel: group.parallel,
            pause_after_each_upgrade_unit: group.pause_after_each_upgrade_unit,
            host_config: Some(HostUpgradeConfig {
                upgrade_mode: group.upgrade_mode,
                vsan_mode: group.maintenance_mode_config_vsan_mode,
                evacuate_powered_off_vms: group.maintenance_mode_config_evacuate_powered_off_vms,
                rebootless_upgrade: group.rebootless_upgrade,
            }),
        }
    }
}

impl From<&EdgeUpgradeSetting> for DeclaredSettings {
    fn from(setting: &EdgeUpgradeSetting) -> Self {
        Self {
            parallel: setting.parallel,
            stop_on_error: true,
            post_upgrade_check: setting.post_upgrade_check,
        }
    }
}

impl From<&HostUpgradeSetting> for DeclaredSettings {
    fn from(setting: &HostUpgradeSetting) -> Self {
        Self {
            parallel: setting.parallel,
            stop_on_error: setting.stop_on_error,
            post_upgrade_check: setting.post_upgrade_check,
        }
    }
}

impl NsxUpgradeRunSpec {
    /// The orchestration request this spec declares.
    pub fn to_upgrade_run(&self) -> UpgradeRun {
        UpgradeRun {
            prepare_ready_id: self.upgrade_prepare_ready_id.clone(),
            edge: ComponentPlan {
                groups: self.edge_groups.iter().map(DeclaredGroup::from).collect(),
                settings: self.edge_upgrade_setting.as_ref().map(DeclaredSettings::from),
            },
            host: ComponentPlan {
                groups: self.host_groups.iter().map(DeclaredGroup::from).collect(),
                settings: self.host_upgrade_setting.as_ref().map(DeclaredSettings::from),
            },
            wait: WaitParams::from_secs(self.timeout, self.interval, self.delay),
        }
    }
}

// ============================================================================
// NsxUpgradeRun Status
// ============================================================================

/// Status of an NsxUpgradeRun.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NsxUpgradeRunStatus {
    /// Current phase of the run.
    #[serde(default)]
    pub phase: RunPhase,

    /// Identity allocated on the first reconcile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    /// Preparation ID the run was first executed for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_prepare_ready_id: Option<String>,

    /// All upgrade unit groups as currently planned by the manager.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upgrade_plan: Vec<GroupPlanEntry>,

    /// Upgrade status of each component and its groups.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state: Vec<ComponentState>,

    /// Error message of the last failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Generation of the spec the last run executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Timestamp when the last run finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<String>,

    /// Conditions representing the current state.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Phase of an upgrade run.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum RunPhase {
    /// Run has not executed yet.
    #[default]
    Pending,

    /// The driver is executing.
    Running,

    /// Every component reached Success.
    Completed,

    /// Some declared groups were left for a later run; MP was skipped.
    PartiallyCompleted,

    /// The last run failed.
    Failed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Pending => write!(f, "Pending"),
            RunPhase::Running => write!(f, "Running"),
            RunPhase::Completed => write!(f, "Completed"),
            RunPhase::PartiallyCompleted => write!(f, "PartiallyCompleted"),
            RunPhase::Failed => write!(f, "Failed"),
        }
    }
}

impl RunPhase {
    pub const ALL: [RunPhase; 5] = [
        RunPhase::Pending,
        RunPhase::Running,
        RunPhase::Completed,
        RunPhase::PartiallyCompleted,
        RunPhase::Failed,
    ];

    /// Whether the run is finished until the spec changes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Completed | RunPhase::PartiallyCompleted | RunPhase::Failed
        )
    }
}

/// Condition describes the state of a run at a certain point.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// "True", "False" or "Unknown".
    pub status: String,
    /// Machine-readable reason for the last transition.
    pub reason: String,
    pub message: String,
    pub last_transition_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }

    pub fn progressing(
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new("Progressing", progressing, reason, message, generation)
    }

    pub fn degraded(degraded: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Degraded", degraded, reason, message, generation)
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::upgrade::types::Component;

    fn minimal_spec() -> NsxUpgradeRunSpec {
        serde_json::from_value(serde_json::json!({
            "upgradePrepareReadyId": "prep-1",
            "manager": {
                "url": "https://nsx.local",
                "credentialsSecret": {"name": "nsx-admin"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_spec_defaults() {
        let spec = minimal_spec();
        assert_eq!(spec.timeout, 3600);
        assert_eq!(spec.interval, 30);
        assert_eq!(spec.delay, 30);
        assert_eq!(spec.manager.credentials_secret.username_key, "username");
        assert_eq!(spec.manager.credentials_secret.password_key, "password");
        assert!(!spec.manager.insecure_skip_verify);
        assert!(spec.edge_groups.is_empty());
    }

    #[test]
    fn test_group_defaults() {
        let group: HostGroup = serde_json::from_value(serde_json::json!({"id": "hg"})).unwrap();
        assert!(group.enabled);
        assert!(group.parallel);
        assert!(!group.pause_after_each_upgrade_unit);
        assert!(!group.maintenance_mode_config_evacuate_powered_off_vms);
        assert!(group.rebootless_upgrade);
        assert!(group.upgrade_mode.is_none());
    }

    #[test]
    fn test_host_group_modes_use_wire_spelling() {
        let group: HostGroup = serde_json::from_value(serde_json::json!({
            "id": "hg",
            "upgradeMode": "stage_in_vlcm",
            "maintenanceModeConfigVsanMode": "ensure_object_accessibility"
        }))
        .unwrap();
        assert_eq!(group.upgrade_mode, Some(HostUpgradeMode::StageInVlcm));
        assert_eq!(
            group.maintenance_mode_config_vsan_mode,
            Some(VsanMode::EnsureObjectAccessibility)
        );
    }

    #[test]
    fn test_to_upgrade_run() {
        let mut spec = minimal_spec();
        spec.edge_groups = vec![EdgeGroup {
            id: "eg".to_string(),
            enabled: false,
            pause_after_each_upgrade_unit: false,
        }];
        spec.host_upgrade_setting = Some(HostUpgradeSetting {
            post_upgrade_check: false,
            parallel: false,
            stop_on_error: true,
        });

        let run = spec.to_upgrade_run();
        assert_eq!(run.prepare_ready_id, "prep-1");
        assert!(run.is_partial(Component::Edge));
        assert!(!run.is_partial(Component::Host));
        assert!(run.edge.groups[0].host_config.is_none());
        assert!(run.edge.settings.is_none());

        let host_settings = run.host.settings.unwrap();
        assert!(host_settings.stop_on_error);
        assert!(!host_settings.post_upgrade_check);
        assert_eq!(run.wait, WaitParams::default());
    }

    #[test]
    fn test_phase_terminal() {
        assert!(!RunPhase::Pending.is_terminal());
        assert!(!RunPhase::Running.is_terminal());
        assert!(RunPhase::Completed.is_terminal());
        assert!(RunPhase::PartiallyCompleted.is_terminal());
        assert!(RunPhase::Failed.is_terminal());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(format!("{}", RunPhase::PartiallyCompleted), "PartiallyCompleted");
        assert_eq!(
            serde_json::to_string(&RunPhase::Running).unwrap(),
            "\"Running\""
        );
    }
}
