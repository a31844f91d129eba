//! Applies declared plan settings of a component.

use tracing::info;

use super::client::SettingsClient;
use super::error::{Operation, RemoteResultExt, UpgradeError};
use super::types::{Component, DeclaredSettings, PlanSettings};

/// Overwrite the caller-owned fields of fetched plan settings.
///
/// Edge always pauses on error, so its settings never carry the field.
pub fn apply_declared_settings(
    settings: &mut PlanSettings,
    component: Component,
    declared: &DeclaredSettings,
) {
    settings.parallel = Some(declared.parallel);
    if component == Component::Edge {
        settings.pause_on_error = None;
    } else {
        settings.pause_on_error = Some(declared.stop_on_error);
    }
}

/// Get, overwrite, and update the plan settings of `component`.
///
/// Does nothing when no settings were declared.
pub async fn configure_settings(
    client: &dyn SettingsClient,
    component: Component,
    declared: Option<&DeclaredSettings>,
) -> Result<(), UpgradeError> {
    let Some(declared) = declared else {
        return Ok(());
    };

    let mut settings = client
        .get(component)
        .await
        .during(Operation::SettingsGet, Some(component), None)?;

    apply_declared_settings(&mut settings, component, declared);

    client
        .update(component, &settings)
        .await
        .during(Operation::SettingsUpdate, Some(component), None)?;

    info!(
        component = %component,
        parallel = declared.parallel,
        "Upgrade plan settings updated"
    );
    Ok(())
}
