//! Validation logic for NsxUpgradeRun specs.
//!
//! Invalid input is rejected here, before any remote call is issued:
//! - wait parameters must be positive and at most thirty days
//! - group ids must be non-empty and unique within a component
//! - the manager reference must be complete
//! - `upgradePrepareReadyId` cannot change once a run executed

use std::collections::HashSet;

use crate::controller::error::{Error, Result};
use crate::crd::{NsxUpgradeRun, NsxUpgradeRunSpec};

/// Minimum value of `timeout` and `interval`, in seconds.
pub const MIN_WAIT_SECS: u64 = 1;

/// Maximum value of `timeout`, `interval` and `delay`, in seconds.
pub const MAX_WAIT_SECS: u64 = 30 * 24 * 3600;

/// Validate the resource, including immutable fields recorded in its status.
pub fn validate_run(resource: &NsxUpgradeRun) -> Result<()> {
    validate_spec(&resource.spec)?;
    let recorded = resource
        .status
        .as_ref()
        .and_then(|s| s.upgrade_prepare_ready_id.as_deref());
    validate_immutable(&resource.spec, recorded)
}

/// Validate the spec on its own.
pub fn validate_spec(spec: &NsxUpgradeRunSpec) -> Result<()> {
    if spec.upgrade_prepare_ready_id.trim().is_empty() {
        return Err(Error::MissingField(
            "spec.upgradePrepareReadyId".to_string(),
        ));
    }
    validate_manager(spec)?;
    validate_wait(spec)?;
    validate_group_ids("edgeGroups", spec.edge_groups.iter().map(|g| g.id.as_str()))?;
    validate_group_ids("hostGroups", spec.host_groups.iter().map(|g| g.id.as_str()))?;
    Ok(())
}

fn validate_manager(spec: &NsxUpgradeRunSpec) -> Result<()> {
    let url = spec.manager.url.trim();
    if url.is_empty() {
        return Err(Error::MissingField("spec.manager.url".to_string()));
    }
    if !url.starts_with("https://") && !url.starts_with("http://") {
        return Err(Error::Validation(format!(
            "manager url '{}' must start with https:// or http://",
            url
        )));
    }
    if spec.manager.credentials_secret.name.trim().is_empty() {
        return Err(Error::MissingField(
            "spec.manager.credentialsSecret.name".to_string(),
        ));
    }
    Ok(())
}

fn validate_wait(spec: &NsxUpgradeRunSpec) -> Result<()> {
    if spec.timeout < MIN_WAIT_SECS {
        return Err(Error::Validation(format!(
            "timeout {} is below minimum {}",
            spec.timeout, MIN_WAIT_SECS
        )));
    }
    if spec.interval < MIN_WAIT_SECS {
        return Err(Error::Validation(format!(
            "interval {} is below minimum {}",
            spec.interval, MIN_WAIT_SECS
        )));
    }
    for (field, value) in [
        ("timeout", spec.timeout),
        ("interval", spec.interval),
        ("delay", spec.delay),
    ] {
        if value > MAX_WAIT_SECS {
            return Err(Error::Validation(format!(
                "{} {} exceeds maximum {}",
                field, value, MAX_WAIT_SECS
            )));
        }
    }
    Ok(())
}

fn validate_group_ids<'a>(field: &str, ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for (index, id) in ids.enumerate() {
        if id.trim().is_empty() {
            return Err(Error::Validation(format!(
                "{}[{}].id must not be empty",
                field, index
            )));
        }
        if !seen.insert(id) {
            return Err(Error::Validation(format!(
                "{} declares group '{}' more than once",
                field, id
            )));
        }
    }
    Ok(())
}

/// Reject a changed `upgradePrepareReadyId`.
pub fn validate_immutable(spec: &NsxUpgradeRunSpec, recorded: Option<&str>) -> Result<()> {
    match recorded {
        Some(previous) if previous != spec.upgrade_prepare_ready_id => {
            Err(Error::Validation(format!(
                "upgradePrepareReadyId is immutable (was '{}', now '{}'); create a new NsxUpgradeRun instead",
                previous, spec.upgrade_prepare_ready_id
            )))
        }
        _ => Ok(()),
    }
}
