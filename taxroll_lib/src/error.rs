//! Error taxonomy for the tax subsystem.
//!
//! Only `Configuration` and `Validation` surface to callers of the
//! calculation API; everything else is recovered internally through the
//! fallback chain and communicated via flags on the result.

use crate::db::DbError;

/// Errors produced by the tax subsystem.
#[derive(thiserror::Error, Debug)]
pub enum TaxError {
    /// Missing credentials or bad service wiring. Fails fast at
    /// construction, never at calculation time.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Malformed caller input (bad amount, missing address field).
    /// Surfaced synchronously, never silently defaulted.
    #[error("Validation error: {0}")]
    Validation(String),
    /// No jurisdiction or rate found. Triggers fallback internally.
    #[error("Not found: {0}")]
    NotFound(String),
    /// A provider call failed after retries.
    #[error("Upstream error: {0}")]
    Upstream(String),
    /// A provider throttled us; cached with a short TTL so repeated
    /// attempts short-circuit without re-calling.
    #[error("Rate limited: {0}")]
    RateLimited(String),
    /// A storage operation failed. Audit writes swallow this; other
    /// paths propagate it.
    #[error("Persistence error: {0}")]
    Persistence(#[from] DbError),
}

impl TaxError {
    /// Whether this error may be retried against the provider.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaxError::Upstream(_))
    }
}
