//! Projections of the remote plan reported back after each run.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::UpgradeClientSet;
use super::error::{Operation, RemoteResultExt, UpgradeError};
use super::types::{Component, GroupStatus, UnitGroup, UpgradeStatus};

/// One upgrade unit group as currently planned remotely.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupPlanEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: String,
    pub enabled: bool,
    pub parallel: bool,
    pub pause_after_each_upgrade_unit: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extended_config: BTreeMap<String, String>,
}

impl From<&UnitGroup> for GroupPlanEntry {
    fn from(group: &UnitGroup) -> Self {
        Self {
            id: group.id.clone(),
            component_type: group.component_type.clone(),
            enabled: group.enabled,
            parallel: group.parallel,
            pause_after_each_upgrade_unit: group.pause_after_each_upgrade_unit,
            extended_config: group.extended_configuration.to_map(),
        }
    }
}

/// Upgrade status of one group.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupState {
    pub group_id: String,
    pub group_name: String,
    pub status: UpgradeStatus,
}

impl From<GroupStatus> for GroupState {
    fn from(status: GroupStatus) -> Self {
        Self {
            group_id: status.group_id,
            group_name: status.group_name,
            status: status.status,
        }
    }
}

/// Upgrade status of one component and its groups.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentState {
    #[serde(rename = "type")]
    pub component_type: String,
    pub status: UpgradeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
    #[serde(default)]
    pub group_states: Vec<GroupState>,
}

/// Everything reported after a run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunOutputs {
    #[serde(default)]
    pub upgrade_group_plan: Vec<GroupPlanEntry>,
    #[serde(default)]
    pub state: Vec<ComponentState>,
}

impl RunOutputs {
    pub fn component(&self, component: Component) -> Option<&ComponentState> {
        self.state
            .iter()
            .find(|s| s.component_type == component.as_wire())
    }
}

/// Read the group plan and per-component state from the remote service.
///
/// Components the coordinator does not know are reported without group
/// states.
pub async fn collect_outputs(clients: &UpgradeClientSet) -> Result<RunOutputs, UpgradeError> {
    let groups = clients
        .groups
        .list(None)
        .await
        .during(Operation::GroupList, None, None)?;
    let upgrade_group_plan = groups.iter().map(GroupPlanEntry::from).collect();

    let summary = clients
        .status
        .get(None)
        .await
        .during(Operation::StatusGet, None, None)?;

    let mut state = Vec::with_capacity(summary.component_status.len());
    for record in summary.component_status {
        let group_states = match record.component_type.parse::<Component>() {
            Ok(component) => clients
                .group_status
                .get_all(component)
                .await
                .during(Operation::GroupStatusGet, Some(component), None)?
                .into_iter()
                .map(GroupState::from)
                .collect(),
            Err(_) => {
                debug!(component_type = %record.component_type, "No group states for component");
                Vec::new()
            }
        };
        state.push(ComponentState {
            component_type: record.component_type,
            status: record.status,
            details: record.details,
            target_version: record.target_version,
            group_states,
        });
    }

    Ok(RunOutputs {
        upgrade_group_plan,
        state,
    })
}
