//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler,
//! including the Kubernetes client, event recorder, the driver tables and
//! the registry of managers with a run in flight.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tokio_util::sync::CancellationToken;

use crate::crd::NsxUpgradeRun;
use crate::health::HealthState;
use crate::upgrade::DriverConfig;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "nsx-upgrade-operator";

/// Managers that currently have a run executing in this process.
///
/// Two NsxUpgradeRun resources pointing at the same manager would fight over
/// one upgrade plan, so only one of them may drive it at a time.
#[derive(Clone, Default)]
pub struct ActiveRuns {
    managers: Arc<Mutex<HashSet<String>>>,
}

impl ActiveRuns {
    /// Claim `manager` for a run. Returns `None` if it is already claimed.
    pub fn try_claim(&self, manager: &str) -> Option<RunClaim> {
        let key = manager.trim_end_matches('/').to_ascii_lowercase();
        let mut managers = self.managers.lock().unwrap_or_else(|e| e.into_inner());
        if !managers.insert(key.clone()) {
            return None;
        }
        Some(RunClaim {
            managers: self.managers.clone(),
            key,
        })
    }

    pub fn is_claimed(&self, manager: &str) -> bool {
        let key = manager.trim_end_matches('/').to_ascii_lowercase();
        self.managers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&key)
    }
}

/// Releases its manager when dropped.
pub struct RunClaim {
    managers: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.managers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

/// Consecutive retryable failures per resource, feeding the error backoff.
#[derive(Clone, Default)]
pub struct RetryCounts {
    counts: Arc<Mutex<HashMap<String, u32>>>,
}

impl RetryCounts {
    /// Record a failure of `key` and return how many preceded it.
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(key.to_string()).or_insert(0);
        let previous = *count;
        *count = count.saturating_add(1);
        previous
    }

    /// Forget the failures of `key` after a successful reconcile.
    pub fn reset(&self, key: &str) {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Cancelled on shutdown; every run waits on a child of this token.
    pub shutdown: CancellationToken,
    /// Tables handed to every driver.
    pub driver_config: DriverConfig,
    pub active_runs: ActiveRuns,
    pub retries: RetryCounts,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        health_state: Option<Arc<HealthState>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
            shutdown,
            driver_config: DriverConfig::default(),
            active_runs: ActiveRuns::default(),
            retries: RetryCounts::default(),
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    async fn publish(&self, resource: &NsxUpgradeRun, event: Event) {
        let reason = event.reason.clone();
        let object_ref = resource.object_ref(&());
        if let Err(e) = self.recorder().publish(&event, &object_ref).await {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event for a resource
    pub async fn publish_normal_event(
        &self,
        resource: &NsxUpgradeRun,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(
            resource,
            Event {
                type_: EventType::Normal,
                reason: reason.into(),
                note,
                action: action.into(),
                secondary: None,
            },
        )
        .await
    }

    /// Publish a warning event for a resource
    pub async fn publish_warning_event(
        &self,
        resource: &NsxUpgradeRun,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(
            resource,
            Event {
                type_: EventType::Warning,
                reason: reason.into(),
                note,
                action: action.into(),
                secondary: None,
            },
        )
        .await
    }
}
