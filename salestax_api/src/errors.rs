//! Error types for the rate provider client.

/// Errors that can occur when querying the rate provider.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The client was constructed without an API key.
    #[error("Missing API key")]
    MissingApiKey,
    /// The provider rejected the configured API key (HTTP 401/403).
    #[error("Invalid API key")]
    InvalidApiKey,
    /// The provider throttled the request (HTTP 429).
    #[error("Rate limited by provider")]
    RateLimited,
    /// An HTTP request failed (network error, timeout, or unreadable body).
    #[error("Request failed")]
    RequestFailed,
    /// The API returned a non-success status with a body snippet.
    #[error("Request failed with status {status}")]
    HttpStatus { status: u16, body: String },
    /// The response body could not be parsed.
    #[error("Failed to parse response: {0}")]
    ParseFailed(String),
}
