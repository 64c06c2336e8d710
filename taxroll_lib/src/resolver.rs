//! Jurisdiction resolution: exact address index first, geocoding second,
//! statistical estimation last. Never fails hard; an unrecognized state is
//! the only way to get an empty set.

use crate::address::{parse_street, Address};
use crate::calculator::TaxService;
use crate::geocode::AddressComponents;
use crate::jurisdiction::{Jurisdiction, JurisdictionType, Provenance};
use crate::query_cache::{CachedResult, QueryCache};
use crate::rate_limiter::ProviderLimits;
use crate::retry::with_retry;

const US_STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("DC", "District of Columbia"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
];

fn state_name(code: &str) -> Option<&'static str> {
    US_STATES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

impl TaxService {
    /// Resolves the applicable jurisdictions for an address, ordered by
    /// layer priority and deduplicated by `(code, state)`.
    pub async fn resolve_jurisdictions(&self, address: &Address) -> Vec<Jurisdiction> {
        let state = address.state_code();
        let Some(state_display) = state_name(&state) else {
            tracing::warn!(state = %state, "unrecognized state code");
            return Vec::new();
        };

        let mut resolved: Vec<Jurisdiction> = Vec::new();

        // Tier 1: exact index lookup.
        if let Some(parsed) = parse_street(&address.line1) {
            match self.db.lookup_address_range(
                &state,
                &address.zip5(),
                &parsed.name_alternates(),
                parsed.number,
                parsed.suffix.as_deref(),
            ) {
                Ok(Some(range)) => {
                    tracing::debug!(range_id = range.range_id, "address index hit");
                    resolved.extend(self.jurisdictions_from_range(&state, &range));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("address index lookup failed: {}", e),
            }
        }

        // Tier 2: external geocoding.
        if resolved.is_empty() {
            if let Some(components) = self.geocode_components(address).await {
                resolved.extend(self.jurisdictions_from_components(&state, &components));
            }
        }

        // Tier 3: statistical estimation from imported co-occurrence data.
        if resolved.is_empty() {
            match self
                .discovery
                .estimate_jurisdictions(&self.db, &state, &address.zip5())
            {
                Ok(estimated) => {
                    if !estimated.is_empty() {
                        tracing::debug!(count = estimated.len(), "using estimated jurisdictions");
                    }
                    resolved.extend(estimated);
                }
                Err(e) => tracing::warn!("jurisdiction estimation failed: {}", e),
            }
        }

        // The state layer always applies once the state is known.
        let state_jurisdiction = match self.db.state_jurisdiction(&state) {
            Ok(Some(j)) => j,
            Ok(None) => {
                Jurisdiction::stub(state_display, JurisdictionType::State, &state, Provenance::Estimated)
            }
            Err(e) => {
                tracing::warn!("state jurisdiction lookup failed: {}", e);
                Jurisdiction::stub(state_display, JurisdictionType::State, &state, Provenance::Estimated)
            }
        };
        resolved.push(state_jurisdiction);

        dedupe_and_order(resolved)
    }

    /// Maps an index row's authority-id slots to jurisdictions. Stored
    /// authorities are preferred; unknown ids become typed stubs keyed by
    /// the id itself.
    fn jurisdictions_from_range(
        &self,
        state: &str,
        range: &crate::db::AddressRangeRow,
    ) -> Vec<Jurisdiction> {
        let slots: Vec<(Option<&String>, JurisdictionType)> = vec![
            (range.state_taid.as_ref(), JurisdictionType::State),
            (range.county_taid.as_ref(), JurisdictionType::County),
            (range.city_taid.as_ref(), JurisdictionType::City),
            (range.transit_taid.as_ref(), JurisdictionType::TransitAuthority),
            (range.district_taid.as_ref(), JurisdictionType::SpecialDistrict),
        ];

        let mut out = Vec::new();
        for (taid, jurisdiction_type) in slots {
            let Some(taid) = taid else { continue };
            out.push(self.jurisdiction_for_taid(state, taid, jurisdiction_type));
        }
        if let Some(extra) = &range.extra_taids {
            for taid in extra.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                out.push(self.jurisdiction_for_taid(state, taid, JurisdictionType::SpecialDistrict));
            }
        }
        out
    }

    fn jurisdiction_for_taid(
        &self,
        state: &str,
        taid: &str,
        jurisdiction_type: JurisdictionType,
    ) -> Jurisdiction {
        match self.db.find_jurisdiction_by_external_id(taid, state) {
            Ok(Some(j)) => j,
            Ok(None) => Jurisdiction {
                id: None,
                code: taid.to_string(),
                name: format!("Authority {}", taid),
                jurisdiction_type,
                state_code: state.to_string(),
                priority: jurisdiction_type.priority(),
                external_id: Some(taid.to_string()),
                provenance: Provenance::Index,
            },
            Err(e) => {
                tracing::warn!(taid, "authority lookup failed: {}", e);
                Jurisdiction {
                    id: None,
                    code: taid.to_string(),
                    name: format!("Authority {}", taid),
                    jurisdiction_type,
                    state_code: state.to_string(),
                    priority: jurisdiction_type.priority(),
                    external_id: Some(taid.to_string()),
                    provenance: Provenance::Index,
                }
            }
        }
    }

    /// Derives county/city jurisdictions from geocoder components. Names
    /// pass through discovery so stored authorities are reused; otherwise
    /// a generated `TYPE_NORMALIZEDNAME` code is used.
    fn jurisdictions_from_components(
        &self,
        state: &str,
        components: &AddressComponents,
    ) -> Vec<Jurisdiction> {
        let mut out = Vec::new();
        if let Some(county) = components.county.as_deref() {
            out.push(self.jurisdiction_for_name(state, county, JurisdictionType::County));
        }
        if let Some(city) = components.city_name() {
            out.push(self.jurisdiction_for_name(state, city, JurisdictionType::City));
        }
        out
    }

    fn jurisdiction_for_name(
        &self,
        state: &str,
        name: &str,
        jurisdiction_type: JurisdictionType,
    ) -> Jurisdiction {
        match self.discovery.find_code(&self.db, state, name, None) {
            Ok(Some(code_match)) => match self.db.get_jurisdiction(&code_match.code, state) {
                Ok(Some(j)) => Jurisdiction {
                    provenance: Provenance::Geocoded,
                    ..j
                },
                _ => {
                    let mut stub =
                        Jurisdiction::stub(name, jurisdiction_type, state, Provenance::Geocoded);
                    stub.code = code_match.code;
                    stub
                }
            },
            _ => Jurisdiction::stub(name, jurisdiction_type, state, Provenance::Geocoded),
        }
    }

    /// Geocodes an address through the cache, limiter, and retry chain.
    async fn geocode_components(&self, address: &Address) -> Option<AddressComponents> {
        let geocoder = self.geocoder.as_ref()?;
        let query = format!(
            "{}, {}, {} {}",
            address.line1,
            address.city,
            address.state_code(),
            address.zip5()
        );
        let cache = QueryCache::new(&self.db, &self.tenant);
        let params = [("q", query.as_str())];

        match cache.get("geocode", "search", &params) {
            Ok(Some(CachedResult::Success(payload))) => {
                if let Ok(place) = serde_json::from_str::<crate::geocode::GeocodePlace>(&payload) {
                    return Some(place.address);
                }
            }
            Ok(Some(CachedResult::Failure { message, .. })) => {
                tracing::debug!(%message, "cached geocode failure, skipping tier");
                return None;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("query cache read failed: {}", e),
        }

        let limits = ProviderLimits::for_provider("geocode");
        if !self.limiter.allow(&self.tenant, "geocode", "search", &limits) {
            tracing::debug!("geocode spacing not met, skipping tier");
            return None;
        }

        let started = std::time::Instant::now();
        let outcome = with_retry(
            "geocode",
            self.retry,
            |e: &crate::geocode::GeocodeError| e.is_retryable(),
            || geocoder.search(&query),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(places) => {
                let Some(place) = places.into_iter().next() else {
                    if let Err(e) =
                        cache.put_error("geocode", "search", &params, "no results", false)
                    {
                        tracing::warn!("query cache write failed: {}", e);
                    }
                    return None;
                };
                if let Ok(payload) = serde_json::to_string(&place) {
                    if let Err(e) =
                        cache.put("geocode", "search", &params, &payload, Some(elapsed_ms))
                    {
                        tracing::warn!("query cache write failed: {}", e);
                    }
                }
                Some(place.address)
            }
            Err(err) => {
                let rate_limited = matches!(err, crate::geocode::GeocodeError::RateLimited);
                tracing::warn!("geocoding failed: {}", err);
                if let Err(e) =
                    cache.put_error("geocode", "search", &params, &err.to_string(), rate_limited)
                {
                    tracing::warn!("query cache write failed: {}", e);
                }
                None
            }
        }
    }
}

/// Deduplicates by `(code, state)` keeping the first (most reliable)
/// occurrence, then orders by layer priority.
fn dedupe_and_order(jurisdictions: Vec<Jurisdiction>) -> Vec<Jurisdiction> {
    let mut seen: Vec<(String, String)> = Vec::new();
    let mut out: Vec<Jurisdiction> = Vec::new();
    for j in jurisdictions {
        let key = j.dedup_key();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(j);
    }
    out.sort_by_key(|j| j.priority);
    out
}
