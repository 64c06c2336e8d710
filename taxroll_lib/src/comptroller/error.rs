//! Error types for bulk-data operations.

use thiserror::Error;

/// Errors from the comptroller bulk data service. Schema mismatches are
/// ingestion-time errors; they never surface at calculation time.
#[derive(Error, Debug)]
pub enum ComptrollerError {
    #[error("Rate limited by data service (HTTP 429)")]
    RateLimited,
    #[error("Download did not redirect to a signed URL")]
    MissingRedirect,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Unexpected file schema: {0}")]
    Schema(String),
    #[error("Archive error: {0}")]
    Archive(String),
    #[error("Network error")]
    Network(#[from] reqwest::Error),
}
