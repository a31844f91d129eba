//! Capability interfaces of the NSX manager upgrade API.
//!
//! The coordinator consumes one narrow trait per remote service and never
//! depends on a concrete transport. [`UpgradeClientSet`] bundles the six
//! capabilities; production code fills it from a single
//! [`NsxManagerClient`](super::nsx_client::NsxManagerClient), tests fill it
//! with an in-memory fabric.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::RemoteError;
use super::types::{
    Component, GroupStatus, PlanSettings, ReorderRequest, UnitGroup, UpgradeStatusSummary,
};

/// Upgrade unit groups.
#[async_trait]
pub trait GroupClient: Send + Sync {
    async fn get(&self, id: &str) -> Result<UnitGroup, RemoteError>;

    async fn update(&self, id: &str, group: &UnitGroup) -> Result<UnitGroup, RemoteError>;

    /// Move group `id` next to the anchor named in `request`.
    async fn reorder(&self, id: &str, request: &ReorderRequest) -> Result<(), RemoteError>;

    /// All groups, optionally restricted to one component, in traversal order.
    async fn list(&self, component: Option<Component>) -> Result<Vec<UnitGroup>, RemoteError>;
}

/// Per-component upgrade plan settings.
#[async_trait]
pub trait SettingsClient: Send + Sync {
    async fn get(&self, component: Component) -> Result<PlanSettings, RemoteError>;

    async fn update(
        &self,
        component: Component,
        settings: &PlanSettings,
    ) -> Result<PlanSettings, RemoteError>;
}

/// Upgrade plan actions.
#[async_trait]
pub trait PlanClient: Send + Sync {
    async fn pause(&self) -> Result<(), RemoteError>;

    async fn reset(&self, component: Component) -> Result<(), RemoteError>;

    async fn upgrade(&self, component: Component) -> Result<(), RemoteError>;
}

/// Status summary of the upgrade.
#[async_trait]
pub trait StatusSummaryClient: Send + Sync {
    /// Summary of one component, or of every component when `None`.
    async fn get(&self, component: Option<Component>)
    -> Result<UpgradeStatusSummary, RemoteError>;
}

/// Per-group upgrade status.
#[async_trait]
pub trait GroupStatusClient: Send + Sync {
    async fn get_all(&self, component: Component) -> Result<Vec<GroupStatus>, RemoteError>;
}

/// Post-upgrade checks.
#[async_trait]
pub trait PostCheckClient: Send + Sync {
    async fn execute_post_upgrade_checks(&self, component: Component) -> Result<(), RemoteError>;
}

/// The six capabilities the coordinator needs.
#[derive(Clone)]
pub struct UpgradeClientSet {
    pub groups: Arc<dyn GroupClient>,
    pub settings: Arc<dyn SettingsClient>,
    pub plan: Arc<dyn PlanClient>,
    pub status: Arc<dyn StatusSummaryClient>,
    pub group_status: Arc<dyn GroupStatusClient>,
    pub post_checks: Arc<dyn PostCheckClient>,
}

impl UpgradeClientSet {
    /// Build a set where one object serves every capability.
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: GroupClient
            + SettingsClient
            + PlanClient
            + StatusSummaryClient
            + GroupStatusClient
            + PostCheckClient
            + 'static,
    {
        Self {
            groups: client.clone(),
            settings: client.clone(),
            plan: client.clone(),
            status: client.clone(),
            group_status: client.clone(),
            post_checks: client,
        }
    }
}

impl std::fmt::Debug for UpgradeClientSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeClientSet").finish_non_exhaustive()
    }
}
