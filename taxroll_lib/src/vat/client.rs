//! VAT provider client implementation.

use std::time::Duration;

use super::error::VatError;
use super::types::{CountryRates, VatCheck};

/// Request timeout for VAT provider calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the VAT validation provider.
pub struct VatClient {
    client: reqwest::Client,
    base_url: String,
}

impl VatClient {
    pub fn new() -> Result<Self, VatError> {
        Self::with_base_url("https://api.vatlookup.eu/v1")
    }

    /// Create a client with a custom base URL (for testing with wiremock).
    pub fn with_base_url(base_url: &str) -> Result<Self, VatError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(VatError::Network)?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    /// Validates a VAT number, returning registration status and the
    /// registered company name when available.
    pub async fn validate(&self, vat_number: &str) -> Result<VatCheck, VatError> {
        let trimmed = vat_number.trim().to_uppercase();
        if trimmed.len() < 4 || !trimmed.chars().take(2).all(|c| c.is_ascii_alphabetic()) {
            return Err(VatError::InvalidNumber(vat_number.to_string()));
        }
        let url = format!("{}/validate/{}", self.base_url, trimmed);
        self.get_json(&url).await
    }

    /// Fetches standard and reduced VAT rates for a country.
    pub async fn country_rates(&self, country_code: &str) -> Result<CountryRates, VatError> {
        let url = format!(
            "{}/rates/{}",
            self.base_url,
            country_code.trim().to_uppercase()
        );
        self.get_json(&url).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, VatError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(VatError::RateLimited);
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
            return Err(VatError::InvalidRequest(format!(
                "HTTP {}: {}",
                status, snippet
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| VatError::ParseFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_malformed_numbers_locally() {
        let client = VatClient::with_base_url("http://127.0.0.1:1").unwrap();
        // Validation fails before any network activity.
        assert!(matches!(
            client.validate("12").await,
            Err(VatError::InvalidNumber(_))
        ));
        assert!(matches!(
            client.validate("123456789").await,
            Err(VatError::InvalidNumber(_))
        ));
    }
}
