//! Status polling with pending/target sets.
//!
//! A wait sleeps for the initial delay, then probes the status summary every
//! interval. The wait ends when the observed status enters the target set,
//! fails as soon as it leaves both sets, and times out once the deadline
//! (measured from the start of the delay) has passed.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::StatusSummaryClient;
use super::error::{Operation, RemoteError, RemoteResultExt, UpgradeError};
use super::types::{
    Component, StatusDetail, StatusTransition, UpgradeStatus, UpgradeStatusSummary, WaitParams,
};

/// Floor on the time between probes.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Decides whether a probe error means "still in progress" rather than failure.
pub type ErrorClassifier = fn(Option<Component>, &RemoteError) -> bool;

/// The management plane restarts while it upgrades itself, so its status
/// endpoint answers 503 or times out for a while. Both are read as InProgress.
pub fn management_restart_tolerance(component: Option<Component>, err: &RemoteError) -> bool {
    component == Some(Component::Management) && (err.is_service_unavailable() || err.is_timeout())
}

/// Tolerates nothing.
pub fn no_tolerance(_component: Option<Component>, _err: &RemoteError) -> bool {
    false
}

/// Polls the status summary until a transition completes.
#[derive(Clone)]
pub struct StatusPoller {
    status: Arc<dyn StatusSummaryClient>,
    params: WaitParams,
    tolerate: ErrorClassifier,
    cancel: CancellationToken,
}

impl StatusPoller {
    pub fn new(
        status: Arc<dyn StatusSummaryClient>,
        params: WaitParams,
        tolerate: ErrorClassifier,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            status,
            params,
            tolerate,
            cancel,
        }
    }

    /// Fetch the status of one component, or the overall status for `None`.
    pub async fn probe(&self, component: Option<Component>) -> Result<StatusDetail, UpgradeError> {
        let summary = self
            .status
            .get(component)
            .await
            .during(Operation::StatusGet, component, None)?;
        detail_of(component, &summary)
    }

    /// Wait until the observed status enters `transition.target`.
    ///
    /// Returns the final observation on success. A timeout too large to be
    /// represented as an instant leaves the wait without a deadline.
    pub async fn wait_for(
        &self,
        component: Option<Component>,
        transition: &StatusTransition,
    ) -> Result<StatusDetail, UpgradeError> {
        let deadline = Instant::now().checked_add(self.params.timeout);
        let interval = self.params.interval.max(MIN_POLL_INTERVAL);
        self.sleep(component, self.params.delay).await?;

        loop {
            let observed = match self.status.get(component).await {
                Ok(summary) => detail_of(component, &summary)?,
                Err(err) if (self.tolerate)(component, &err) => {
                    debug!(
                        component = ?component,
                        error = %err,
                        "Status endpoint unavailable, treating as in progress"
                    );
                    StatusDetail::new(UpgradeStatus::InProgress, err.to_string())
                }
                Err(source) => {
                    return Err(UpgradeError::Remote {
                        operation: Operation::StatusGet,
                        component,
                        target: None,
                        source,
                    });
                }
            };

            debug!(
                component = ?component,
                status = observed.status.as_wire(),
                "Current upgrade status"
            );

            if transition.target.contains(observed.status) {
                return Ok(observed);
            }
            if !transition.pending.contains(observed.status) {
                warn!(
                    component = ?component,
                    status = observed.status.as_wire(),
                    detail = %observed.detail,
                    "Upgrade status left the pending set"
                );
                return Err(UpgradeError::UnexpectedStatus {
                    component,
                    target: transition.target.clone(),
                    observed,
                });
            }
            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    return Err(UpgradeError::WaitTimeout {
                        component,
                        target: transition.target.clone(),
                        timeout: self.params.timeout,
                        last: Some(observed),
                    });
                }
                Some(deadline) => interval.min(deadline.saturating_duration_since(now)),
                None => interval,
            };
            self.sleep(component, pause).await?;
        }
    }

    async fn sleep(
        &self,
        component: Option<Component>,
        duration: Duration,
    ) -> Result<(), UpgradeError> {
        if duration.is_zero() {
            return if self.cancel.is_cancelled() {
                Err(UpgradeError::Cancelled { component })
            } else {
                Ok(())
            };
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(UpgradeError::Cancelled { component }),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

fn detail_of(
    component: Option<Component>,
    summary: &UpgradeStatusSummary,
) -> Result<StatusDetail, UpgradeError> {
    match component {
        None => Ok(StatusDetail::new(summary.overall_upgrade_status, "")),
        Some(c) => summary
            .component(c)
            .map(|s| StatusDetail::new(s.status, s.details.clone().unwrap_or_default()))
            .ok_or(UpgradeError::StatusNotFound(c)),
    }
}
