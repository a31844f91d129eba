//! Orchestration of staged NSX fabric upgrades.
//!
//! Components are driven strictly Edge, then Host, then the management
//! plane. Before a component is launched it is observed, paused and reset
//! if it was in flight, and its declared group configuration, group order
//! and plan settings are applied. The remote manager performs the actual
//! upgrade; this module only steers its upgrade plan and waits on it.
//!
//! ```text
//! UpgradeDriver::execute
//!   for component in [EDGE, HOST, MP]:
//!     probe component -> (pause -> wait stable)
//!     wait overall stable -> reset -> groups -> settings
//!     upgrade -> wait target
//!   dispatch post-checks
//! ```

pub mod client;
pub mod driver;
pub mod error;
pub mod groups;
pub mod nsx_client;
pub mod output;
pub mod poller;
pub mod postcheck;
pub mod settings;
pub mod types;

pub use client::{
    GroupClient, GroupStatusClient, PlanClient, PostCheckClient, SettingsClient,
    StatusSummaryClient, UpgradeClientSet,
};
pub use driver::{ComponentOutcome, ComponentReport, DriverConfig, RunReport, UpgradeDriver};
pub use error::{Operation, RemoteError, UpgradeError};
pub use nsx_client::{NsxManagerClient, NsxManagerConfig};
pub use output::{ComponentState, GroupPlanEntry, GroupState, RunOutputs, collect_outputs};
pub use poller::{StatusPoller, management_restart_tolerance};
pub use types::{
    Component, ComponentPlan, DeclaredGroup, DeclaredSettings, HostUpgradeConfig,
    HostUpgradeMode, StatusDetail, StatusTransition, UpgradeRun, UpgradeStatus, VsanMode,
    WaitParams,
};
