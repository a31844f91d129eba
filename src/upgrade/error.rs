//! Error types for the upgrade coordinator.
//!
//! `RemoteError` classifies a single failed call to the NSX manager.
//! `UpgradeError` is what a run returns: the remote error annotated with the
//! operation, component and object it was issued for, or a wait outcome.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::types::{Component, StatusDetail, StatusSet};

/// Failure of one remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The manager answered 503 or could not be reached.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The request did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_service_unavailable(&self) -> bool {
        matches!(self, RemoteError::ServiceUnavailable(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// Remote operations issued by the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    GroupGet,
    GroupUpdate,
    GroupReorder,
    GroupList,
    SettingsGet,
    SettingsUpdate,
    PlanPause,
    PlanReset,
    PlanUpgrade,
    StatusGet,
    GroupStatusGet,
    PostUpgradeCheck,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::GroupGet => write!(f, "GroupGet"),
            Operation::GroupUpdate => write!(f, "GroupUpdate"),
            Operation::GroupReorder => write!(f, "GroupReorder"),
            Operation::GroupList => write!(f, "GroupList"),
            Operation::SettingsGet => write!(f, "SettingsGet"),
            Operation::SettingsUpdate => write!(f, "SettingsUpdate"),
            Operation::PlanPause => write!(f, "PlanPause"),
            Operation::PlanReset => write!(f, "PlanReset"),
            Operation::PlanUpgrade => write!(f, "PlanUpgrade"),
            Operation::StatusGet => write!(f, "StatusGet"),
            Operation::GroupStatusGet => write!(f, "GroupStatusGet"),
            Operation::PostUpgradeCheck => write!(f, "PostUpgradeCheck"),
        }
    }
}

/// Error returned by the coordinator.
#[derive(Error, Debug)]
pub enum UpgradeError {
    /// A remote call failed.
    #[error("{operation} failed{}: {source}", scope(.component, .target))]
    Remote {
        operation: Operation,
        component: Option<Component>,
        /// Group id or other remote identity the call addressed.
        target: Option<String>,
        #[source]
        source: RemoteError,
    },

    /// The status did not reach the target set in time.
    #[error(
        "failed to wait upgrade{} to be {target}: timeout after {timeout:?}.{}",
        scope(.component, &None),
        last_observed(.last)
    )]
    WaitTimeout {
        component: Option<Component>,
        target: StatusSet,
        timeout: Duration,
        last: Option<StatusDetail>,
    },

    /// The status left the pending set without reaching the target set.
    #[error(
        "failed to wait upgrade{} to be {target}: unexpected status {}. {observed}",
        scope(.component, &None),
        wire_status(.observed)
    )]
    UnexpectedStatus {
        component: Option<Component>,
        target: StatusSet,
        observed: StatusDetail,
    },

    #[error("couldn't find upgrade status of {0} component")]
    StatusNotFound(Component),

    #[error("upgrade run cancelled{}", scope(.component, &None))]
    Cancelled { component: Option<Component> },
}

fn scope(component: &Option<Component>, target: &Option<String>) -> String {
    match (component, target) {
        (Some(c), Some(t)) => format!(" for {} ({})", c, t),
        (Some(c), None) => format!(" for {}", c),
        (None, Some(t)) => format!(" for {}", t),
        (None, None) => String::new(),
    }
}

fn wire_status(observed: &StatusDetail) -> &'static str {
    observed.status.as_wire()
}

fn last_observed(last: &Option<StatusDetail>) -> String {
    match last {
        Some(detail) => format!(" {}", detail),
        None => String::new(),
    }
}

impl UpgradeError {
    /// Component the failure is attributed to, if any.
    pub fn component(&self) -> Option<Component> {
        match self {
            UpgradeError::Remote { component, .. }
            | UpgradeError::WaitTimeout { component, .. }
            | UpgradeError::UnexpectedStatus { component, .. }
            | UpgradeError::Cancelled { component } => *component,
            UpgradeError::StatusNotFound(component) => Some(*component),
        }
    }

    /// Remote operation that failed, for remote failures.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            UpgradeError::Remote { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    /// Last status seen before a wait gave up.
    pub fn last_observed(&self) -> Option<&StatusDetail> {
        match self {
            UpgradeError::WaitTimeout { last, .. } => last.as_ref(),
            UpgradeError::UnexpectedStatus { observed, .. } => Some(observed),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, UpgradeError::Cancelled { .. })
    }

    /// Whether re-entering the run later may succeed without caller changes.
    pub fn is_transient(&self) -> bool {
        match self {
            UpgradeError::Remote { source, .. } => {
                source.is_service_unavailable() || source.is_timeout()
            }
            UpgradeError::WaitTimeout { .. } | UpgradeError::Cancelled { .. } => true,
            UpgradeError::UnexpectedStatus { .. } | UpgradeError::StatusNotFound(_) => false,
        }
    }
}

/// Annotate a remote result with the operation it belongs to.
pub trait RemoteResultExt<T> {
    fn during(
        self,
        operation: Operation,
        component: Option<Component>,
        target: Option<&str>,
    ) -> Result<T, UpgradeError>;
}

impl<T> RemoteResultExt<T> for Result<T, RemoteError> {
    fn during(
        self,
        operation: Operation,
        component: Option<Component>,
        target: Option<&str>,
    ) -> Result<T, UpgradeError> {
        self.map_err(|source| UpgradeError::Remote {
            operation,
            component,
            target: target.map(str::to_string),
            source,
        })
    }
}
