//! The calculation orchestrator: jurisdiction resolution, rate
//! evaluation, exemptions, and audit write-through.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::allocation::ServiceType;
use crate::audit;
use crate::cache::MemoryCache;
use crate::db::Db;
use crate::discovery::DiscoveryEngine;
use crate::error::TaxError;
use crate::geocode::GeocodeClient;
use crate::jurisdiction::{Jurisdiction, Provenance};
use crate::query_cache::{CachedResult, QueryCache};
use crate::rate_limiter::{ProviderLimits, RateLimiter};
use crate::rates::{round_cents, RateEngine, TaxComponent, TierMode};
use crate::retry::{with_retry, RetryConfig};

/// Whether a calculation is binding for compliance or a quote.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CalcType {
    #[default]
    Preview,
    Final,
}

impl CalcType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalcType::Preview => "preview",
            CalcType::Final => "final",
        }
    }
}

/// One tax calculation request.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CalcRequest {
    pub amount: f64,
    pub service_type: String,
    pub address: Address,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub subject_ref: Option<String>,
    #[serde(default)]
    pub calculation_type: CalcType,
    /// Apply the federal excise threshold rule (telecom lines).
    #[serde(default)]
    pub include_federal_excise: bool,
    /// Apply the universal-service contribution (telecom lines).
    #[serde(default)]
    pub include_usf: bool,
}

/// An exemption that fired during a calculation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppliedExemption {
    pub exemption_type: String,
    pub percentage: f64,
    pub certificate_ref: Option<String>,
}

/// A complete calculation result. Always structurally complete: degraded
/// outcomes are communicated through the flags, never through missing
/// fields.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TaxResult {
    pub total_tax: f64,
    pub effective_rate: f64,
    pub breakdown: Vec<TaxComponent>,
    pub jurisdictions: Vec<Jurisdiction>,
    pub exemptions_applied: Vec<AppliedExemption>,
    pub success: bool,
    /// True when any component came from statistical estimation.
    pub estimated: bool,
    /// True when any resolution or rate tier below the primary was used.
    pub fallback_used: bool,
    pub error: Option<String>,
}

impl TaxResult {
    fn empty_failure(message: &str) -> Self {
        TaxResult {
            total_tax: 0.0,
            effective_rate: 0.0,
            breakdown: Vec::new(),
            jurisdictions: Vec::new(),
            exemptions_applied: Vec::new(),
            success: false,
            estimated: false,
            fallback_used: true,
            error: Some(message.to_string()),
        }
    }
}

/// The tax subsystem facade: owns storage, the discovery engine, the
/// limiter, and the optional provider clients. One instance per tenant.
pub struct TaxService {
    pub(crate) db: Db,
    pub(crate) tenant: String,
    pub(crate) discovery: DiscoveryEngine,
    pub(crate) limiter: RateLimiter,
    pub(crate) engine: RateEngine,
    pub(crate) hot_cache: MemoryCache,
    pub(crate) geocoder: Option<GeocodeClient>,
    pub(crate) rates_api: Option<salestax_api::Client>,
    pub(crate) retry: RetryConfig,
}

impl TaxService {
    /// Builds a service over an opened database. Provider clients are
    /// optional; without them the corresponding fallback tiers are
    /// skipped.
    pub fn new(db: Db, tenant: &str) -> Self {
        TaxService {
            db,
            tenant: tenant.to_string(),
            discovery: DiscoveryEngine::new(),
            limiter: RateLimiter::new(),
            engine: RateEngine::new(TierMode::default()),
            hot_cache: MemoryCache::new(Duration::from_secs(300)),
            geocoder: None,
            rates_api: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_geocoder(mut self, client: GeocodeClient) -> Self {
        self.geocoder = Some(client);
        self
    }

    pub fn with_rates_api(mut self, client: salestax_api::Client) -> Self {
        self.rates_api = Some(client);
        self
    }

    /// Wires the external pricing engine from an API key, failing fast on
    /// missing credentials.
    pub fn with_rates_api_key(self, api_key: &str) -> Result<Self, TaxError> {
        let client = salestax_api::Client::new(api_key)
            .map_err(|e| TaxError::Configuration(e.to_string()))?;
        Ok(self.with_rates_api(client))
    }

    pub fn with_tier_mode(mut self, mode: TierMode) -> Self {
        self.engine = RateEngine::new(mode);
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Jurisdiction details lookup for host workflows.
    pub fn jurisdiction_details(&self, ids: &[i64]) -> Result<Vec<Jurisdiction>, TaxError> {
        Ok(self.db.get_jurisdictions_by_ids(ids)?)
    }

    /// Calculates tax for one line and writes an audit record.
    ///
    /// Only `Validation` errors surface; provider and data failures
    /// degrade through the fallback chain into a flagged result.
    pub async fn calculate(&self, req: &CalcRequest) -> Result<TaxResult, TaxError> {
        let result = self.calculate_inner(req).await?;
        audit::record_calculation(&self.db, &self.tenant, req, &result);
        Ok(result)
    }

    /// Calculation without the audit write; bundle allocation records one
    /// summary for the whole bundle instead.
    pub(crate) async fn calculate_inner(&self, req: &CalcRequest) -> Result<TaxResult, TaxError> {
        validate_request(req)?;

        let service_type = ServiceType::normalize(&req.service_type);
        let jurisdictions = self.resolve_jurisdictions(&req.address).await;
        if jurisdictions.is_empty() {
            tracing::warn!(
                state = %req.address.state_code(),
                "no jurisdictions resolved, returning flagged zero result"
            );
            return Ok(TaxResult::empty_failure(&format!(
                "no jurisdictions found for state '{}'",
                req.address.state_code()
            )));
        }

        let today = Utc::now().date_naive();
        let mut breakdown: Vec<TaxComponent> = Vec::new();
        let mut estimated = false;
        let mut fallback_used =
            jurisdictions.iter().any(|j| j.provenance != Provenance::Index);

        for jurisdiction in &jurisdictions {
            let rows = match jurisdiction.id {
                Some(id) => self
                    .db
                    .rates_for_jurisdiction(id, today)?
                    .into_iter()
                    .filter(|r| r.covers_service(service_type.as_str()))
                    .collect::<Vec<_>>(),
                None => Vec::new(),
            };

            if !rows.is_empty() {
                // One component per tax type; rows are ordered by priority
                // so the first of each type wins.
                let mut seen_types: Vec<&str> = Vec::new();
                for row in &rows {
                    if seen_types.contains(&row.tax_type.as_str()) {
                        continue;
                    }
                    seen_types.push(&row.tax_type);
                    breakdown.push(self.engine.component_for(jurisdiction, row, req.amount));
                }
                continue;
            }

            // No stored rate: the state layer may ask the external pricing
            // engine; every layer can fall back to the national average.
            if jurisdiction.jurisdiction_type == crate::jurisdiction::JurisdictionType::State {
                if let Some(state_rate) = self.provider_state_rate(&req.address).await {
                    fallback_used = true;
                    breakdown.push(self.engine.component_from_provider(
                        jurisdiction,
                        state_rate,
                        req.amount,
                    ));
                    continue;
                }
            }

            if let Some(component) = self.engine.estimated_component(jurisdiction, req.amount) {
                estimated = true;
                fallback_used = true;
                breakdown.push(component);
            }
        }

        if req.include_federal_excise {
            if let Some(component) = self.engine.federal_excise_component(req.amount) {
                breakdown.push(component);
            }
        }
        if req.include_usf {
            breakdown.push(TaxComponent {
                jurisdiction_name: "Universal Service Fund".to_string(),
                jurisdiction_type: crate::jurisdiction::JurisdictionType::Federal,
                tax_type: "usf".to_string(),
                rate: crate::rates::USF_RATE,
                tax_amount: crate::rates::usf_contribution(req.amount),
                authority: None,
                estimated: false,
            });
        }

        // Exemptions scale every component; the applied set is recorded
        // even when it zeroes the tax entirely.
        let mut exemptions_applied = Vec::new();
        if let Some(ref client_id) = req.client_id {
            for exemption in self.db.active_exemptions(client_id, today)? {
                let factor = 1.0 - exemption.exemption_percentage / 100.0;
                for component in &mut breakdown {
                    component.tax_amount *= factor;
                }
                exemptions_applied.push(AppliedExemption {
                    exemption_type: exemption.exemption_type,
                    percentage: exemption.exemption_percentage,
                    certificate_ref: exemption.certificate_ref,
                });
            }
        }

        for component in &mut breakdown {
            component.tax_amount = round_cents(component.tax_amount);
        }
        let total_tax = round_cents(breakdown.iter().map(|c| c.tax_amount).sum());
        let effective_rate = if req.amount > 0.0 {
            total_tax / req.amount * 100.0
        } else {
            0.0
        };

        Ok(TaxResult {
            total_tax,
            effective_rate,
            breakdown,
            jurisdictions,
            exemptions_applied,
            success: true,
            estimated,
            fallback_used,
            error: None,
        })
    }

    /// State-level rate from the external pricing engine, going through
    /// the hot cache, the durable query cache, the rate limiter, and
    /// retry. Any failure returns `None` and the caller estimates.
    pub(crate) async fn provider_state_rate(&self, address: &Address) -> Option<f64> {
        let client = self.rates_api.as_ref()?;
        let state = address.state_code();
        let zip = address.zip5();

        let hot_key = format!("staterate:{}:{}", state, zip);
        if let Some(cached) = self.hot_cache.get(&hot_key) {
            return cached.parse().ok();
        }

        let cache = QueryCache::new(&self.db, &self.tenant);
        let params = [("zip", zip.as_str()), ("state", state.as_str())];
        match cache.get("salestax", "rates", &params) {
            Ok(Some(CachedResult::Success(payload))) => {
                let parsed: Result<salestax_api::RateResponse, _> = serde_json::from_str(&payload);
                if let Ok(resp) = parsed {
                    let rate = resp.as_percentages().state_rate;
                    self.hot_cache.set(hot_key, rate.to_string());
                    return Some(rate);
                }
            }
            Ok(Some(CachedResult::Failure { message, rate_limited })) => {
                tracing::debug!(
                    %message,
                    rate_limited,
                    "cached provider failure, skipping external rate lookup"
                );
                return None;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("query cache read failed: {}", e),
        }

        let limits = ProviderLimits::for_provider("salestax");
        if !self.limiter.allow(&self.tenant, "salestax", "rates", &limits) {
            if let Err(e) = cache.put_error("salestax", "rates", &params, "local rate limit", true)
            {
                tracing::warn!("query cache write failed: {}", e);
            }
            return None;
        }

        let query = if zip.len() == 5 {
            salestax_api::RateQuery::by_zip(&zip)
        } else {
            salestax_api::RateQuery::by_city_state(&address.city, &state)
        };
        let started = std::time::Instant::now();
        let outcome = with_retry(
            "salestax",
            self.retry,
            |e: &salestax_api::Error| {
                matches!(
                    e,
                    salestax_api::Error::RequestFailed | salestax_api::Error::HttpStatus { .. }
                )
            },
            || client.get_rates(&query),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(resp) => {
                let rate = resp.as_percentages().state_rate;
                if let Ok(payload) = serde_json::to_string(&resp) {
                    if let Err(e) =
                        cache.put("salestax", "rates", &params, &payload, Some(elapsed_ms))
                    {
                        tracing::warn!("query cache write failed: {}", e);
                    }
                }
                self.hot_cache.set(hot_key, rate.to_string());
                Some(rate)
            }
            Err(err) => {
                let rate_limited = matches!(err, salestax_api::Error::RateLimited);
                tracing::warn!("external rate lookup failed: {}", err);
                if let Err(e) =
                    cache.put_error("salestax", "rates", &params, &err.to_string(), rate_limited)
                {
                    tracing::warn!("query cache write failed: {}", e);
                }
                None
            }
        }
    }
}

fn validate_request(req: &CalcRequest) -> Result<(), TaxError> {
    if !req.amount.is_finite() || req.amount < 0.0 {
        return Err(TaxError::Validation(format!(
            "amount must be a non-negative number, got {}",
            req.amount
        )));
    }
    let state = req.address.state_code();
    if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(TaxError::Validation(format!(
            "state must be a two-letter code, got '{}'",
            req.address.state
        )));
    }
    if req.service_type.trim().is_empty() {
        return Err(TaxError::Validation("service type is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::jurisdiction::{generate_code, JurisdictionType};
    use chrono::NaiveDate;

    fn seeded_service() -> TaxService {
        let db = Db::open_in_memory().unwrap();
        db.init().unwrap();

        for (name, jtype, taid, rate) in [
            ("Texas", JurisdictionType::State, "1", 6.25),
            ("Austin MTA", JurisdictionType::TransitAuthority, "3227999", 1.50),
        ] {
            let j = Jurisdiction {
                id: None,
                code: generate_code(jtype, name),
                name: name.to_string(),
                jurisdiction_type: jtype,
                state_code: "TX".into(),
                priority: jtype.priority(),
                external_id: Some(taid.to_string()),
                provenance: Provenance::Index,
            };
            let id = db.upsert_jurisdiction(&j).unwrap();
            db.insert_rate_version(
                id,
                "*",
                "sales",
                "percentage",
                Some(rate),
                None,
                None,
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                Some(taid),
                "comptroller",
            )
            .unwrap();
        }

        // Index row covering 1100 Congress Ave pointing at both
        // authorities.
        let mut svc_db = db;
        svc_db
            .replace_address_ranges(
                "TX",
                Some("227"),
                "comptroller",
                &[crate::db::AddressRangeRow {
                    range_id: 0,
                    state_code: "TX".into(),
                    county_code: Some("227".into()),
                    address_from: 1000,
                    address_to: 1198,
                    address_parity: crate::address::Parity::Even,
                    street_pre_direction: None,
                    street_name: "CONGRESS".into(),
                    street_suffix: Some("AVE".into()),
                    street_post_direction: None,
                    zip_code: "78701".into(),
                    zip_plus4: None,
                    state_taid: Some("1".into()),
                    county_taid: None,
                    city_taid: None,
                    transit_taid: Some("3227999".into()),
                    district_taid: None,
                    extra_taids: None,
                    source: "comptroller".into(),
                }],
            )
            .unwrap();

        TaxService::new(svc_db, "tenant-1")
    }

    fn request(amount: f64) -> CalcRequest {
        CalcRequest {
            amount,
            service_type: "voip".into(),
            address: Address::new("1100 Congress Ave", "Austin", "TX", "78701"),
            client_id: None,
            subject_ref: None,
            calculation_type: CalcType::Preview,
            include_federal_excise: false,
            include_usf: false,
        }
    }

    #[tokio::test]
    async fn texas_two_component_scenario() {
        let service = seeded_service();
        let result = service.calculate(&request(100.0)).await.unwrap();

        assert!(result.success);
        assert!(!result.estimated);
        assert_eq!(result.breakdown.len(), 2);
        assert!((result.total_tax - 7.75).abs() < 1e-9);
        assert!((result.effective_rate - 7.75).abs() < 1e-9);
        let sum: f64 = result.breakdown.iter().map(|c| c.tax_amount).sum();
        assert!((sum - 7.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn zero_amount_yields_zero_not_error() {
        let service = seeded_service();
        let result = service.calculate(&request(0.0)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.total_tax, 0.0);
        assert_eq!(result.effective_rate, 0.0);
    }

    #[tokio::test]
    async fn percentage_components_scale_linearly() {
        let service = seeded_service();
        let single = service.calculate(&request(100.0)).await.unwrap();
        let double = service.calculate(&request(200.0)).await.unwrap();
        assert!((double.total_tax - 2.0 * single.total_tax).abs() < 0.01);
    }

    #[tokio::test]
    async fn identical_inputs_identical_breakdowns() {
        let service = seeded_service();
        let a = service.calculate(&request(100.0)).await.unwrap();
        let b = service.calculate(&request(100.0)).await.unwrap();
        assert_eq!(a.breakdown, b.breakdown);
        assert_eq!(a.total_tax, b.total_tax);
    }

    #[tokio::test]
    async fn exemption_law() {
        let service = seeded_service();
        let base = service.calculate(&request(100.0)).await.unwrap();

        service
            .db()
            .insert_exemption("c-full", "nonprofit", 100.0, Some("CERT-1"))
            .unwrap();
        service
            .db()
            .insert_exemption("c-none", "reseller", 0.0, None)
            .unwrap();

        let mut req = request(100.0);
        req.client_id = Some("c-full".into());
        let full = service.calculate(&req).await.unwrap();
        assert_eq!(full.total_tax, 0.0);
        // The applied exemption is still recorded for audit.
        assert_eq!(full.exemptions_applied.len(), 1);
        assert_eq!(full.exemptions_applied[0].percentage, 100.0);

        req.client_id = Some("c-none".into());
        let zero_pct = service.calculate(&req).await.unwrap();
        assert!((zero_pct.total_tax - base.total_tax).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_state_returns_flagged_failure() {
        let service = seeded_service();
        let mut req = request(100.0);
        req.address = Address::new("1 Somewhere", "Nowhere", "ZZ", "00000");
        let result = service.calculate(&req).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.total_tax, 0.0);
        assert!(result.error.is_some());
        // Structure is complete even on failure.
        assert!(result.breakdown.is_empty());
        assert!(result.exemptions_applied.is_empty());
    }

    #[tokio::test]
    async fn validation_errors_surface() {
        let service = seeded_service();
        let mut req = request(f64::NAN);
        assert!(matches!(
            service.calculate(&req).await,
            Err(TaxError::Validation(_))
        ));

        req = request(100.0);
        req.address.state = "Texas".into();
        assert!(matches!(
            service.calculate(&req).await,
            Err(TaxError::Validation(_))
        ));

        req = request(100.0);
        req.service_type = "  ".into();
        assert!(matches!(
            service.calculate(&req).await,
            Err(TaxError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn federal_excise_opt_in() {
        let service = seeded_service();

        let mut req = request(0.15);
        req.include_federal_excise = true;
        let small = service.calculate(&req).await.unwrap();
        assert!(small
            .breakdown
            .iter()
            .all(|c| c.tax_type != "excise"));

        let mut req = request(5.0);
        req.include_federal_excise = true;
        let result = service.calculate(&req).await.unwrap();
        let excise = result
            .breakdown
            .iter()
            .find(|c| c.tax_type == "excise")
            .unwrap();
        assert!((excise.tax_amount - 0.15).abs() < 1e-9);
    }

    #[tokio::test]
    async fn audit_record_written() {
        let service = seeded_service();
        service.calculate(&request(100.0)).await.unwrap();
        let records = service
            .db()
            .query_calculations("tenant-1", None, None)
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].calculation_type, "preview");
        assert!((records[0].total_tax - 7.75).abs() < 1e-9);
    }
}
