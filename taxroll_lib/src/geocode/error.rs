//! Error types for geocoding operations.

use thiserror::Error;

/// Errors from the geocoding provider.
#[derive(Error, Debug)]
pub enum GeocodeError {
    #[error("Rate limited by geocoder (HTTP 429)")]
    RateLimited,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Failed to parse response: {0}")]
    ParseFailed(String),
    #[error("Network error")]
    Network(#[from] reqwest::Error),
}

impl GeocodeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GeocodeError::Network(_))
    }
}
