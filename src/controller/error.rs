//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

use crate::upgrade::UpgradeError;

/// Base delay of the retry backoff.
const BACKOFF_BASE_SECS: u64 = 5;
/// Upper bound of the retry backoff.
const BACKOFF_MAX_SECS: u64 = 300;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Remote upgrade API failure while refreshing outputs
    #[error("Upgrade API error: {0}")]
    Upgrade(#[from] UpgradeError),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Validation error in resource spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// Another run against the same manager is in progress
    #[error("Run in progress against {0}")]
    RunInProgress(String),

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, rate limiting, and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Upgrade(e) => e.is_transient(),
            Error::Transient(_) | Error::RunInProgress(_) => true,
            Error::Validation(_) | Error::Permanent(_) | Error::MissingField(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        self.requeue_after_with_retry_count(0)
    }

    /// Exponential backoff for retryable errors, capped at five minutes.
    pub fn requeue_after_with_retry_count(&self, retry_count: u32) -> Duration {
        if !self.is_retryable() {
            return Duration::from_secs(BACKOFF_MAX_SECS);
        }
        let factor = 2u64.saturating_pow(retry_count.min(16));
        Duration::from_secs(BACKOFF_BASE_SECS.saturating_mul(factor).min(BACKOFF_MAX_SECS))
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
