//! VAT validation adapter.
//!
//! Validates EU VAT registration numbers and fetches country-level VAT
//! rates for international clients during billing. Consumed by host
//! workflows outside this subsystem; carried here with the other
//! provider adapters so caching and rate limiting are uniform.

pub mod client;
pub mod error;
pub mod types;

pub use client::VatClient;
pub use error::VatError;
pub use types::{CountryRates, VatCheck};

use crate::calculator::TaxService;
use crate::error::TaxError;
use crate::query_cache::{CachedResult, QueryCache};
use crate::rate_limiter::ProviderLimits;
use crate::retry::with_retry;

impl TaxService {
    /// Validates a VAT number through the cache, limiter, and retry
    /// chain. Unlike the calculation path, failures here surface as typed
    /// errors: billing workflows need to distinguish throttling from an
    /// invalid registration.
    pub async fn validate_vat(
        &self,
        client: &VatClient,
        vat_number: &str,
    ) -> Result<VatCheck, TaxError> {
        let normalized = vat_number.trim().to_uppercase();
        let cache = QueryCache::new(&self.db, &self.tenant);
        let params = [("vat_number", normalized.as_str())];

        match cache.get("vat", "validate", &params) {
            Ok(Some(CachedResult::Success(payload))) => {
                if let Ok(check) = serde_json::from_str::<VatCheck>(&payload) {
                    return Ok(check);
                }
            }
            Ok(Some(CachedResult::Failure { message, rate_limited })) => {
                return Err(if rate_limited {
                    TaxError::RateLimited(message)
                } else {
                    TaxError::Upstream(message)
                });
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("query cache read failed: {}", e),
        }

        let limits = ProviderLimits::for_provider("vat");
        if !self.limiter.allow(&self.tenant, "vat", "validate", &limits) {
            return Err(TaxError::RateLimited("local VAT request budget exhausted".into()));
        }

        let started = std::time::Instant::now();
        let outcome = with_retry(
            "vat",
            self.retry,
            |e: &VatError| matches!(e, VatError::Network(_)),
            || client.validate(&normalized),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(check) => {
                if let Ok(payload) = serde_json::to_string(&check) {
                    if let Err(e) =
                        cache.put("vat", "validate", &params, &payload, Some(elapsed_ms))
                    {
                        tracing::warn!("query cache write failed: {}", e);
                    }
                }
                Ok(check)
            }
            Err(VatError::InvalidNumber(n)) => {
                Err(TaxError::Validation(format!("malformed VAT number '{}'", n)))
            }
            Err(err) => {
                let rate_limited = matches!(err, VatError::RateLimited);
                if let Err(e) =
                    cache.put_error("vat", "validate", &params, &err.to_string(), rate_limited)
                {
                    tracing::warn!("query cache write failed: {}", e);
                }
                Err(if rate_limited {
                    TaxError::RateLimited(err.to_string())
                } else {
                    TaxError::Upstream(err.to_string())
                })
            }
        }
    }
}
