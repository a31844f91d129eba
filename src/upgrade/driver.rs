//! The run driver.
//!
//! Drives each component through observe, quiesce, overall wait, reset,
//! configure, launch and wait, strictly in the configured component order. The driver is
//! re-entrant: executing the same run again picks up wherever the remote
//! plan is, skipping components that already succeeded and re-applying the
//! declared configuration to the rest.

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::client::UpgradeClientSet;
use super::error::{Operation, RemoteResultExt, UpgradeError};
use super::groups::configure_groups;
use super::poller::{ErrorClassifier, StatusPoller, management_restart_tolerance};
use super::postcheck::dispatch_post_checks;
use super::settings::configure_settings;
use super::types::{Component, StatusDetail, StatusTransition, UpgradeRun, UpgradeStatus};

/// Immutable tables that shape a run.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Order in which components are driven.
    pub component_order: Vec<Component>,
    /// Wait used to quiesce a component and between components.
    pub quiesce: StatusTransition,
    /// Which probe errors a wait treats as "still in progress".
    pub tolerate_probe_error: ErrorClassifier,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            component_order: Component::ORDERED.to_vec(),
            quiesce: StatusTransition::until_stable(),
            tolerate_probe_error: management_restart_tolerance,
        }
    }
}

/// How one component ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentOutcome {
    /// Already Success on entry; declared changes were ignored.
    AlreadySucceeded,
    /// Reached Success.
    Completed,
    /// Declared groups left part of the component for later.
    PartiallyCompleted,
    /// Not attempted because an earlier component was partial.
    Skipped,
}

impl std::fmt::Display for ComponentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentOutcome::AlreadySucceeded => write!(f, "AlreadySucceeded"),
            ComponentOutcome::Completed => write!(f, "Completed"),
            ComponentOutcome::PartiallyCompleted => write!(f, "PartiallyCompleted"),
            ComponentOutcome::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Result of one component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentReport {
    pub component: Component,
    pub outcome: ComponentOutcome,
    /// Status observed when the component finished, if it was polled.
    pub final_status: Option<StatusDetail>,
}

/// Result of a successful run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub components: Vec<ComponentReport>,
    /// Components whose post-upgrade checks were triggered.
    pub post_checks: Vec<Component>,
}

impl RunReport {
    pub fn outcome(&self, component: Component) -> Option<ComponentOutcome> {
        self.components
            .iter()
            .find(|r| r.component == component)
            .map(|r| r.outcome)
    }

    /// Whether any component finished only partially.
    pub fn is_partial(&self) -> bool {
        self.components
            .iter()
            .any(|r| r.outcome == ComponentOutcome::PartiallyCompleted)
    }
}

/// Orchestrates an upgrade run against one fabric.
pub struct UpgradeDriver {
    clients: UpgradeClientSet,
    config: DriverConfig,
    cancel: CancellationToken,
}

impl UpgradeDriver {
    pub fn new(clients: UpgradeClientSet, config: DriverConfig) -> Self {
        Self::with_cancellation(clients, config, CancellationToken::new())
    }

    /// Build a driver whose waits stop when `cancel` fires.
    pub fn with_cancellation(
        clients: UpgradeClientSet,
        config: DriverConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            clients,
            config,
            cancel,
        }
    }

    /// Handle that cancels the run in progress.
    ///
    /// Operations already issued are not rolled back.
    pub fn cancellation_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive every component of `run` to its target status.
    #[instrument(skip_all, fields(prepare_ready_id = %run.prepare_ready_id))]
    pub async fn execute(&self, run: &UpgradeRun) -> Result<RunReport, UpgradeError> {
        let poller = StatusPoller::new(
            self.clients.status.clone(),
            run.wait,
            self.config.tolerate_probe_error,
            self.cancel.clone(),
        );

        let mut report = RunReport::default();
        let mut partial_seen = false;

        for &component in &self.config.component_order {
            if self.cancel.is_cancelled() {
                return Err(UpgradeError::Cancelled {
                    component: Some(component),
                });
            }

            if component == Component::Management && partial_seen {
                info!("Some upgrade unit groups have not been upgraded, skipping MP upgrade");
                report.components.push(ComponentReport {
                    component,
                    outcome: ComponentOutcome::Skipped,
                    final_status: None,
                });
                continue;
            }

            let mut entry = poller.probe(Some(component)).await?;
            if component.is_customizable() && entry.status.is_in_flight() {
                entry = self.quiesce(&poller, component, entry.status).await?;
            } else if entry.status == UpgradeStatus::Pausing {
                // A pausing MP plan settles on its own.
                entry = poller
                    .wait_for(Some(component), &self.config.quiesce)
                    .await?;
            }

            if entry.status == UpgradeStatus::Success {
                warn!(
                    component = %component,
                    "Upgrade already succeeded, declared changes are ignored"
                );
                report.components.push(ComponentReport {
                    component,
                    outcome: ComponentOutcome::AlreadySucceeded,
                    final_status: Some(entry),
                });
                continue;
            }

            let partial = run.is_partial(component);
            if entry.status.is_in_flight() {
                // An MP upgrade cannot be paused; resume by waiting on it.
                info!(component = %component, "Component upgrade already running");
            } else {
                // The overall status lingers in IN_PROGRESS for a while after
                // the previous component finishes. Nothing may change until
                // it settles.
                poller.wait_for(None, &self.config.quiesce).await?;
                if component.is_customizable() {
                    self.prepare(component, run).await?;
                }
                self.clients
                    .plan
                    .upgrade(component)
                    .await
                    .during(Operation::PlanUpgrade, Some(component), None)?;
                info!(component = %component, partial, "Component upgrade launched");
            }

            let finished = poller
                .wait_for(Some(component), &StatusTransition::component_upgrade(partial))
                .await?;

            let outcome = if partial {
                partial_seen = true;
                info!(component = %component, "Upgrade partially completed");
                ComponentOutcome::PartiallyCompleted
            } else {
                info!(component = %component, "Upgrade completed");
                ComponentOutcome::Completed
            };
            report.components.push(ComponentReport {
                component,
                outcome,
                final_status: Some(finished),
            });
        }

        report.post_checks = dispatch_post_checks(self.clients.post_checks.as_ref(), run).await;
        Ok(report)
    }

    /// Pause an in-flight component and wait until it is stable.
    async fn quiesce(
        &self,
        poller: &StatusPoller,
        component: Component,
        status: UpgradeStatus,
    ) -> Result<StatusDetail, UpgradeError> {
        // Pausing components are already on their way to Paused.
        if status == UpgradeStatus::InProgress {
            info!(component = %component, "Pausing in-flight upgrade");
            self.clients
                .plan
                .pause()
                .await
                .during(Operation::PlanPause, Some(component), None)?;
        }
        poller
            .wait_for(Some(component), &self.config.quiesce)
            .await
    }

    /// Reset the plan of a stable component and apply its declared configuration.
    async fn prepare(&self, component: Component, run: &UpgradeRun) -> Result<(), UpgradeError> {
        self.clients
            .plan
            .reset(component)
            .await
            .during(Operation::PlanReset, Some(component), None)?;

        if let Some(plan) = run.plan(component) {
            configure_groups(self.clients.groups.as_ref(), component, &plan.groups).await?;
            configure_settings(
                self.clients.settings.as_ref(),
                component,
                plan.settings.as_ref(),
            )
            .await?;
        }
        Ok(())
    }
}
