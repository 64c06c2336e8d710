//! HTTP client for the SalesTax rate provider.

use std::time::Duration;

use url::Url;

use crate::{errors::Error, query::RateQuery, types::RateResponse};

/// Request timeout for provider calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the SalesTax rate provider.
///
/// Construction fails fast when the API key is absent so a misconfigured
/// deployment surfaces at service start, not at calculation time.
pub struct Client {
    client: reqwest::Client,
    api_key: String,
    base_api_url: String,
}

impl Client {
    /// Creates a new client pointing at the production API.
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        Self::with_base_url("https://api.salestaxrates.io/v2", api_key)
    }

    /// Creates a new client with a custom base URL. Used for testing with wiremock.
    pub fn with_base_url(base_url: &str, api_key: impl Into<String>) -> Result<Self, Error> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::MissingApiKey);
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                tracing::error!("Failed to build HTTP client: {}", e);
                Error::RequestFailed
            })?;
        Ok(Self {
            client,
            api_key,
            base_api_url: base_url.to_string(),
        })
    }

    fn get_url(&self, path: &str, query: &RateQuery) -> Result<Url, Error> {
        let url = Url::parse(&format!("{}{}", self.base_api_url, path)).map_err(|e| {
            tracing::error!("Invalid URL constructed: {}", e);
            Error::RequestFailed
        })?;
        Ok(query.add_to_url(&url))
    }

    /// Fetches combined rates for the queried location.
    pub async fn get_rates(&self, query: &RateQuery) -> Result<RateResponse, Error> {
        let url = self.get_url("/rates", query)?;
        let resp = self
            .client
            .get(url)
            .header("x-api-key", &self.api_key)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Rate request failed: {}", e);
                Error::RequestFailed
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::InvalidApiKey);
        }

        let body = resp.text().await.map_err(|e| {
            tracing::error!("Failed to read response body: {}", e);
            Error::RequestFailed
        })?;

        if !status.is_success() {
            let snippet = truncate_body(&body);
            tracing::error!("Request failed with status {}: {}", status, snippet);
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body: snippet,
            });
        }

        serde_json::from_str::<RateResponse>(&body).map_err(|e| {
            tracing::error!("Failed to parse rates: {} | body: {}", e, truncate_body(&body));
            Error::ParseFailed(e.to_string())
        })
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 2000;
    if body.len() <= MAX {
        body.to_string()
    } else {
        format!("{}...[truncated]", &body[..MAX])
    }
}
