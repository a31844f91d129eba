//! Applies declared group configuration and ordering to the remote plan.

use tracing::{debug, info};

use super::client::GroupClient;
use super::error::{Operation, RemoteResultExt, UpgradeError};
use super::types::{Component, DeclaredGroup, ReorderRequest, UnitGroup};

/// Overwrite the caller-owned fields of a fetched group.
///
/// Edge groups keep their remote `parallel` flag. Host groups get the typed
/// host configuration written into their extended configuration; a Host
/// group declared without one is encoded with the default record.
pub fn apply_declared_group(group: &mut UnitGroup, component: Component, declared: &DeclaredGroup) {
    group.enabled = declared.enabled;
    group.pause_after_each_upgrade_unit = declared.pause_after_each_upgrade_unit;

    if component != Component::Edge {
        group.parallel = declared.parallel;
    }

    if component == Component::Host {
        declared
            .host_config
            .clone()
            .unwrap_or_default()
            .apply_to(&mut group.extended_configuration);
    }
}

/// Configure every declared group of `component`, then chain them in order.
///
/// Each group is fetched, updated, and (from the second one on) reordered to
/// sit right after its predecessor. Groups not declared are left alone.
pub async fn configure_groups(
    client: &dyn GroupClient,
    component: Component,
    declared: &[DeclaredGroup],
) -> Result<(), UpgradeError> {
    let mut previous: Option<&str> = None;

    for group in declared {
        let id = group.id.as_str();
        let mut remote = client
            .get(id)
            .await
            .during(Operation::GroupGet, Some(component), Some(id))?;

        apply_declared_group(&mut remote, component, group);

        client
            .update(id, &remote)
            .await
            .during(Operation::GroupUpdate, Some(component), Some(id))?;
        debug!(component = %component, group = id, "Updated upgrade unit group");

        if let Some(anchor) = previous {
            client
                .reorder(id, &ReorderRequest::after(anchor))
                .await
                .during(Operation::GroupReorder, Some(component), Some(id))?;
            debug!(component = %component, group = id, after = anchor, "Reordered upgrade unit group");
        }
        previous = Some(id);
    }

    if !declared.is_empty() {
        info!(component = %component, groups = declared.len(), "Upgrade unit groups configured");
    }
    Ok(())
}
