//! Geocoding client implementation.

use std::time::Duration;

use super::error::GeocodeError;
use super::types::GeocodePlace;

/// Request timeout for geocoding calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Geocoding client for a Nominatim-class provider.
///
/// The provider requires an identifying user agent; pass the deployment's
/// contact string at construction.
pub struct GeocodeClient {
    client: reqwest::Client,
    base_url: String,
}

impl GeocodeClient {
    /// Create a client with the public endpoint.
    pub fn new(user_agent: &str) -> Result<Self, GeocodeError> {
        Self::with_base_url("https://nominatim.openstreetmap.org", user_agent)
    }

    /// Create a client with a custom base URL (for testing with wiremock).
    pub fn with_base_url(base_url: &str, user_agent: &str) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(GeocodeError::Network)?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    /// Searches for a free-form address, returning matches best-first.
    pub async fn search(&self, query: &str) -> Result<Vec<GeocodePlace>, GeocodeError> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", query),
                ("format", "jsonv2"),
                ("addressdetails", "1"),
                ("countrycodes", "us"),
                ("limit", "3"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::RateLimited);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".to_string());
            let snippet = if body.len() > 200 {
                format!("{}...", &body[..200])
            } else {
                body
            };
            return Err(GeocodeError::InvalidRequest(format!(
                "HTTP {}: {}",
                status, snippet
            )));
        }

        response
            .json::<Vec<GeocodePlace>>()
            .await
            .map_err(|e| GeocodeError::ParseFailed(e.to_string()))
    }
}
