//! Domain types shared by the upgrade coordinator.
//!
//! Remote payloads (`UnitGroup`, `PlanSettings`, `UpgradeStatusSummary`, ...)
//! mirror the NSX manager upgrade API and keep any field they do not model in
//! a flattened map so a read-modify-write cycle never drops data. Declared
//! types (`DeclaredGroup`, `DeclaredSettings`, `UpgradeRun`) describe what the
//! caller wants the fabric to look like.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============================================================================
// Components
// ============================================================================

/// Top-level upgrade domain of the fabric.
///
/// The declaration order is the upgrade order and the tie-break order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema,
)]
pub enum Component {
    /// Edge transport nodes.
    #[serde(rename = "EDGE")]
    Edge,
    /// Hypervisor hosts.
    #[serde(rename = "HOST")]
    Host,
    /// Management plane.
    #[serde(rename = "MP")]
    Management,
}

impl Component {
    /// All components in upgrade order.
    pub const ORDERED: [Component; 3] = [Component::Edge, Component::Host, Component::Management];

    /// Component type as spelled by the remote API.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Component::Edge => "EDGE",
            Component::Host => "HOST",
            Component::Management => "MP",
        }
    }

    /// Whether groups and plan settings of this component may be customized.
    pub fn is_customizable(&self) -> bool {
        !matches!(self, Component::Management)
    }

    /// Whether the remote service can run post-upgrade checks for this component.
    pub fn supports_post_check(&self) -> bool {
        !matches!(self, Component::Management)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EDGE" => Ok(Component::Edge),
            "HOST" => Ok(Component::Host),
            "MP" => Ok(Component::Management),
            _ => Err(format!("Unknown component type: {}", s)),
        }
    }
}

// ============================================================================
// Status vocabulary
// ============================================================================

/// Upgrade status of a component or of the whole upgrade.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeStatus {
    #[default]
    NotStarted,
    InProgress,
    Pausing,
    Paused,
    Success,
    Failed,
}

impl UpgradeStatus {
    /// Statuses during which the remote service is actively transitioning.
    pub const IN_FLIGHT: [UpgradeStatus; 2] = [UpgradeStatus::InProgress, UpgradeStatus::Pausing];

    /// Statuses that are not in flight.
    pub const STABLE: [UpgradeStatus; 4] = [
        UpgradeStatus::NotStarted,
        UpgradeStatus::Paused,
        UpgradeStatus::Success,
        UpgradeStatus::Failed,
    ];

    /// Whether the status is InProgress or Pausing.
    pub fn is_in_flight(&self) -> bool {
        Self::IN_FLIGHT.contains(self)
    }

    /// Whether the status is stable (not in flight).
    pub fn is_stable(&self) -> bool {
        !self.is_in_flight()
    }

    /// Status as spelled by the remote API.
    pub fn as_wire(&self) -> &'static str {
        match self {
            UpgradeStatus::NotStarted => "NOT_STARTED",
            UpgradeStatus::InProgress => "IN_PROGRESS",
            UpgradeStatus::Pausing => "PAUSING",
            UpgradeStatus::Paused => "PAUSED",
            UpgradeStatus::Success => "SUCCESS",
            UpgradeStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for UpgradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeStatus::NotStarted => write!(f, "NotStarted"),
            UpgradeStatus::InProgress => write!(f, "InProgress"),
            UpgradeStatus::Pausing => write!(f, "Pausing"),
            UpgradeStatus::Paused => write!(f, "Paused"),
            UpgradeStatus::Success => write!(f, "Success"),
            UpgradeStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// An ordered set of statuses used as the pending or target side of a wait.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusSet(Vec<UpgradeStatus>);

impl StatusSet {
    /// Build a set, dropping duplicates while keeping first-seen order.
    pub fn new(statuses: impl IntoIterator<Item = UpgradeStatus>) -> Self {
        let mut set = Vec::new();
        for status in statuses {
            if !set.contains(&status) {
                set.push(status);
            }
        }
        Self(set)
    }

    pub fn contains(&self, status: UpgradeStatus) -> bool {
        self.0.contains(&status)
    }

    pub fn as_slice(&self) -> &[UpgradeStatus] {
        &self.0
    }
}

impl fmt::Display for StatusSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(UpgradeStatus::as_wire).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Pending and target sides of a status wait.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusTransition {
    /// Statuses that mean "keep polling".
    pub pending: StatusSet,
    /// Statuses that end the wait successfully.
    pub target: StatusSet,
}

impl StatusTransition {
    pub fn new(
        pending: impl IntoIterator<Item = UpgradeStatus>,
        target: impl IntoIterator<Item = UpgradeStatus>,
    ) -> Self {
        Self {
            pending: StatusSet::new(pending),
            target: StatusSet::new(target),
        }
    }

    /// Wait until the observed status leaves InProgress/Pausing.
    pub fn until_stable() -> Self {
        Self::new(UpgradeStatus::IN_FLIGHT, UpgradeStatus::STABLE)
    }

    /// Wait for a launched component upgrade to finish.
    ///
    /// A partial upgrade ends in Paused once every enabled group is done, so
    /// Pausing becomes pending and Paused becomes an accepted outcome.
    pub fn component_upgrade(partial: bool) -> Self {
        if partial {
            Self::new(
                [UpgradeStatus::InProgress, UpgradeStatus::Pausing],
                [UpgradeStatus::Success, UpgradeStatus::Paused],
            )
        } else {
            Self::new([UpgradeStatus::InProgress], [UpgradeStatus::Success])
        }
    }
}

/// A status observation together with the remote detail string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusDetail {
    pub status: UpgradeStatus,
    pub detail: String,
}

impl StatusDetail {
    pub fn new(status: UpgradeStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for StatusDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Current status: {}. Details: {}",
            self.status.as_wire(),
            self.detail
        )
    }
}

// ============================================================================
// Extended configuration
// ============================================================================

/// A single entry of a group's extended configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

/// String-valued extended configuration bag of a unit group.
///
/// Order is preserved because the remote service stores a list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ExtendedConfig(Vec<KeyValuePair>);

impl ExtendedConfig {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }

    /// Insert or overwrite a key, keeping its position when present.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|kv| kv.key == key) {
            Some(existing) => existing.value = value,
            None => self.0.push(KeyValuePair {
                key: key.to_string(),
                value,
            }),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.0.retain(|kv| kv.key != key);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|kv| kv.key.as_str())
    }

    /// Flatten into a map; later duplicates win.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|kv| (kv.key.clone(), kv.value.clone()))
            .collect()
    }
}

impl FromIterator<(String, String)> for ExtendedConfig {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut config = ExtendedConfig::default();
        for (key, value) in iter {
            config.set(&key, value);
        }
        config
    }
}

/// Host upgrade mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HostUpgradeMode {
    MaintenanceMode,
    InPlace,
    StageInVlcm,
}

impl HostUpgradeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostUpgradeMode::MaintenanceMode => "maintenance_mode",
            HostUpgradeMode::InPlace => "in_place",
            HostUpgradeMode::StageInVlcm => "stage_in_vlcm",
        }
    }
}

/// vSAN behaviour when a host enters maintenance mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VsanMode {
    EvacuateAllData,
    EnsureObjectAccessibility,
    NoAction,
}

impl VsanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VsanMode::EvacuateAllData => "evacuate_all_data",
            VsanMode::EnsureObjectAccessibility => "ensure_object_accessibility",
            VsanMode::NoAction => "no_action",
        }
    }
}

pub const UPGRADE_MODE_KEY: &str = "upgrade_mode";
pub const VSAN_MODE_KEY: &str = "maintenance_mode_config_vsan_mode";
pub const EVACUATE_POWERED_OFF_VMS_KEY: &str = "maintenance_mode_config_evacuate_powered_off_vms";
pub const REBOOTLESS_UPGRADE_KEY: &str = "rebootless_upgrade";

/// Keys of the Host extended configuration owned by [`HostUpgradeConfig`].
pub const HOST_CONFIG_KEYS: [&str; 4] = [
    UPGRADE_MODE_KEY,
    VSAN_MODE_KEY,
    EVACUATE_POWERED_OFF_VMS_KEY,
    REBOOTLESS_UPGRADE_KEY,
];

/// Typed view of the four extended configuration keys a Host group recognizes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostUpgradeConfig {
    pub upgrade_mode: Option<HostUpgradeMode>,
    pub vsan_mode: Option<VsanMode>,
    pub evacuate_powered_off_vms: bool,
    pub rebootless_upgrade: bool,
}

impl Default for HostUpgradeConfig {
    fn default() -> Self {
        Self {
            upgrade_mode: None,
            vsan_mode: None,
            evacuate_powered_off_vms: false,
            rebootless_upgrade: true,
        }
    }
}

impl HostUpgradeConfig {
    /// Apply this record onto an existing bag.
    ///
    /// The four owned keys are replaced as a unit: the mode keys are written
    /// only when set, the two flags are always written as "true"/"false".
    /// Keys this record does not own are left untouched.
    pub fn apply_to(&self, config: &mut ExtendedConfig) {
        for key in HOST_CONFIG_KEYS {
            config.remove(key);
        }
        if let Some(mode) = self.upgrade_mode {
            config.set(UPGRADE_MODE_KEY, mode.as_str());
        }
        if let Some(vsan) = self.vsan_mode {
            config.set(VSAN_MODE_KEY, vsan.as_str());
        }
        config.set(
            EVACUATE_POWERED_OFF_VMS_KEY,
            bool_str(self.evacuate_powered_off_vms),
        );
        config.set(REBOOTLESS_UPGRADE_KEY, bool_str(self.rebootless_upgrade));
    }

    /// Encode into a fresh bag holding only the owned keys.
    pub fn to_extended_config(&self) -> ExtendedConfig {
        let mut config = ExtendedConfig::default();
        self.apply_to(&mut config);
        config
    }
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

// ============================================================================
// Remote payloads
// ============================================================================

/// Upgrade unit group as returned by the remote service.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct UnitGroup {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Component type as reported remotely (`EDGE`, `HOST`, `MP`, ...).
    #[serde(rename = "type", default)]
    pub component_type: String,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub parallel: bool,

    #[serde(default)]
    pub pause_after_each_upgrade_unit: bool,

    #[serde(default, skip_serializing_if = "ExtendedConfig::is_empty")]
    pub extended_configuration: ExtendedConfig,

    /// Fields not modelled here (`_revision`, `upgrade_units`, ...).
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

impl UnitGroup {
    /// The component this group belongs to, when it is one the coordinator knows.
    pub fn component(&self) -> Option<Component> {
        self.component_type.parse().ok()
    }
}

/// Placement of a group relative to an anchor group.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReorderRequest {
    /// Anchor group id.
    pub id: String,
    /// Place before the anchor instead of after it.
    pub is_before: bool,
}

impl ReorderRequest {
    pub fn after(anchor: impl Into<String>) -> Self {
        Self {
            id: anchor.into(),
            is_before: false,
        }
    }

    pub fn before(anchor: impl Into<String>) -> Self {
        Self {
            id: anchor.into(),
            is_before: true,
        }
    }
}

/// Per-component plan settings as stored by the remote service.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PlanSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_on_error: Option<bool>,

    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// Status of one component inside a status summary.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ComponentStatusSummary {
    pub component_type: String,
    pub status: UpgradeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(
        rename = "target_component_version",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_version: Option<String>,
}

/// Status summary of the whole upgrade.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct UpgradeStatusSummary {
    pub overall_upgrade_status: UpgradeStatus,
    #[serde(default)]
    pub component_status: Vec<ComponentStatusSummary>,
}

impl UpgradeStatusSummary {
    /// Status record of a component, if the summary lists it.
    pub fn component(&self, component: Component) -> Option<&ComponentStatusSummary> {
        self.component_status
            .iter()
            .find(|c| c.component_type == component.as_wire())
    }
}

/// Upgrade status of one unit group.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct GroupStatus {
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
    pub status: UpgradeStatus,
}

// ============================================================================
// Declared run
// ============================================================================

/// Caller-declared state of one unit group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclaredGroup {
    pub id: String,
    pub enabled: bool,
    /// Ignored for Edge groups.
    pub parallel: bool,
    pub pause_after_each_upgrade_unit: bool,
    /// Only meaningful for Host groups.
    pub host_config: Option<HostUpgradeConfig>,
}

impl DeclaredGroup {
    /// An enabled, parallel group with no pause and no host configuration.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            parallel: true,
            pause_after_each_upgrade_unit: false,
            host_config: None,
        }
    }

    /// Whether this group makes its component finish in Paused.
    pub fn is_partial(&self) -> bool {
        !self.enabled || self.pause_after_each_upgrade_unit
    }
}

/// Caller-declared plan settings of one component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclaredSettings {
    pub parallel: bool,
    /// Ignored for Edge, which always pauses on error.
    pub stop_on_error: bool,
    /// Never sent to the settings API; consumed by the post-check dispatcher.
    pub post_upgrade_check: bool,
}

impl Default for DeclaredSettings {
    fn default() -> Self {
        Self {
            parallel: true,
            stop_on_error: false,
            post_upgrade_check: true,
        }
    }
}

/// Declared groups and settings of one component.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComponentPlan {
    pub groups: Vec<DeclaredGroup>,
    pub settings: Option<DeclaredSettings>,
}

impl ComponentPlan {
    /// Whether any declared group is disabled or pauses after each unit.
    pub fn is_partial(&self) -> bool {
        self.groups.iter().any(DeclaredGroup::is_partial)
    }
}

/// Poller timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitParams {
    /// Upper bound on one wait, initial delay included.
    pub timeout: Duration,
    /// Time between probes.
    pub interval: Duration,
    /// Time before the first probe.
    pub delay: Duration,
}

pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_DELAY_SECS: u64 = 30;

impl WaitParams {
    pub fn from_secs(timeout: u64, interval: u64, delay: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout),
            interval: Duration::from_secs(interval),
            delay: Duration::from_secs(delay),
        }
    }
}

impl Default for WaitParams {
    fn default() -> Self {
        Self::from_secs(DEFAULT_TIMEOUT_SECS, DEFAULT_INTERVAL_SECS, DEFAULT_DELAY_SECS)
    }
}

/// One orchestration request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpgradeRun {
    /// Preparation this run belongs to.
    pub prepare_ready_id: String,
    pub edge: ComponentPlan,
    pub host: ComponentPlan,
    pub wait: WaitParams,
}

impl UpgradeRun {
    /// Declared plan of a component; Management is never customized.
    pub fn plan(&self, component: Component) -> Option<&ComponentPlan> {
        match component {
            Component::Edge => Some(&self.edge),
            Component::Host => Some(&self.host),
            Component::Management => None,
        }
    }

    /// Whether the declared groups of a component make it a partial upgrade.
    pub fn is_partial(&self, component: Component) -> bool {
        self.plan(component).is_some_and(ComponentPlan::is_partial)
    }
}
