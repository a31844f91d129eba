//! Post-upgrade check dispatch.

use tracing::{info, warn};

use super::client::PostCheckClient;
use super::types::{Component, UpgradeRun};

/// Trigger post-upgrade checks for every component whose declared settings
/// ask for one.
///
/// Results are not awaited; they are read later through the post-check
/// API. A failed trigger is logged and otherwise ignored. Returns the
/// components for which the trigger was accepted.
pub async fn dispatch_post_checks(client: &dyn PostCheckClient, run: &UpgradeRun) -> Vec<Component> {
    let mut triggered = Vec::new();

    for component in Component::ORDERED {
        if !component.supports_post_check() {
            continue;
        }
        let wanted = run
            .plan(component)
            .and_then(|plan| plan.settings.as_ref())
            .is_some_and(|settings| settings.post_upgrade_check);
        if !wanted {
            continue;
        }

        info!(component = %component, "Starting post-upgrade checks");
        match client.execute_post_upgrade_checks(component).await {
            Ok(()) => triggered.push(component),
            Err(e) => warn!(
                component = %component,
                error = %e,
                "Failed to trigger post-upgrade checks"
            ),
        }
    }

    triggered
}
