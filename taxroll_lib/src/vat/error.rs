//! Error types for VAT provider operations.

use thiserror::Error;

/// Errors from the VAT validation provider.
#[derive(Error, Debug)]
pub enum VatError {
    #[error("Rate limited by VAT provider (HTTP 429)")]
    RateLimited,
    #[error("Invalid VAT number format: {0}")]
    InvalidNumber(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Failed to parse response: {0}")]
    ParseFailed(String),
    #[error("Network error")]
    Network(#[from] reqwest::Error),
}
