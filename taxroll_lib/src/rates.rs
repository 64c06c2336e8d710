//! Rate evaluation: percentage, fixed, and tiered schedules, the federal
//! telecom rules, and the national-average estimation fallback.

use serde::{Deserialize, Serialize};

use crate::db::TaxRateRow;
use crate::jurisdiction::{Jurisdiction, JurisdictionType, Provenance};

/// Federal excise applies only above this amount.
pub const FEDERAL_EXCISE_THRESHOLD: f64 = 0.20;

/// Federal excise percentage.
pub const FEDERAL_EXCISE_RATE: f64 = 3.0;

/// Universal-service contribution factor applied to gross amount.
pub const USF_RATE: f64 = 33.4;

/// Flat estimate used when every other path is exhausted in a bundle
/// fallback.
pub const FLAT_FALLBACK_RATE: f64 = 8.5;

/// One tier of an amount-bracketed schedule.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tier {
    pub min_amount: f64,
    /// `None` marks the open-ended top tier.
    pub max_amount: Option<f64>,
    pub rate: f64,
}

/// How tiered schedules are evaluated.
///
/// Billing runs `WholeAmount`: the single tier containing the base
/// amount prices the entire base. `Marginal` taxes each bracket's
/// portion separately and sits behind this seam so callers can switch
/// without touching the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TierMode {
    #[default]
    WholeAmount,
    Marginal,
}

/// One evaluated component of a breakdown.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaxComponent {
    pub jurisdiction_name: String,
    pub jurisdiction_type: JurisdictionType,
    pub tax_type: String,
    /// Percentage applied, or the fixed amount for `fixed_amount` rates.
    pub rate: f64,
    pub tax_amount: f64,
    /// Upstream authority id, when known.
    pub authority: Option<String>,
    /// True when the rate came from statistical estimation rather than a
    /// stored or provider rate.
    pub estimated: bool,
}

/// Rounds to cents. Applied at reporting boundaries, not mid-computation.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Validates a tier schedule: ascending, contiguous, non-overlapping,
/// at most one open-ended top tier (which must be last).
pub fn validate_tiers(tiers: &[Tier]) -> Result<(), String> {
    if tiers.is_empty() {
        return Err("tier schedule is empty".into());
    }
    for (i, tier) in tiers.iter().enumerate() {
        if let Some(max) = tier.max_amount {
            if tier.min_amount > max {
                return Err(format!("tier {} has min above max", i));
            }
        } else if i != tiers.len() - 1 {
            return Err(format!("open-ended tier {} is not last", i));
        }
        if i > 0 {
            let prev = &tiers[i - 1];
            let Some(prev_max) = prev.max_amount else {
                return Err(format!("tier {} follows an open-ended tier", i));
            };
            if tier.min_amount < prev_max {
                return Err(format!("tier {} overlaps tier {}", i, i - 1));
            }
        }
    }
    Ok(())
}

/// Evaluates a tier schedule against a base amount.
pub fn evaluate_tiers(tiers: &[Tier], base: f64, mode: TierMode) -> f64 {
    match mode {
        TierMode::WholeAmount => {
            let Some(tier) = tiers.iter().find(|t| {
                base >= t.min_amount && t.max_amount.map_or(true, |max| base <= max)
            }) else {
                return 0.0;
            };
            base * tier.rate / 100.0
        }
        TierMode::Marginal => {
            let mut tax = 0.0;
            for tier in tiers {
                if base <= tier.min_amount {
                    break;
                }
                let upper = tier.max_amount.unwrap_or(base).min(base);
                let portion = upper - tier.min_amount;
                if portion > 0.0 {
                    tax += portion * tier.rate / 100.0;
                }
            }
            tax
        }
    }
}

/// National-average rate by jurisdiction type, the last-resort estimate
/// when no stored or provider rate exists. Values are percentages.
pub fn national_average_rate(jurisdiction_type: JurisdictionType) -> Option<f64> {
    match jurisdiction_type {
        JurisdictionType::State => Some(5.75),
        JurisdictionType::County => Some(1.0),
        JurisdictionType::City => Some(1.5),
        JurisdictionType::SpecialDistrict => Some(0.5),
        JurisdictionType::TransitAuthority => Some(0.5),
        JurisdictionType::Federal | JurisdictionType::CongressionalDistrict => None,
    }
}

/// Federal excise: flat 3% on amounts strictly greater than $0.20,
/// otherwise zero. A threshold rule, not a tier schedule.
pub fn federal_excise(amount: f64) -> f64 {
    if amount > FEDERAL_EXCISE_THRESHOLD {
        amount * FEDERAL_EXCISE_RATE / 100.0
    } else {
        0.0
    }
}

/// Universal-service contribution: flat percentage of gross, no threshold.
pub fn usf_contribution(amount: f64) -> f64 {
    amount * USF_RATE / 100.0
}

/// Stateless rate evaluator. Storage rows in, components out.
pub struct RateEngine {
    tier_mode: TierMode,
}

impl Default for RateEngine {
    fn default() -> Self {
        Self::new(TierMode::default())
    }
}

impl RateEngine {
    pub fn new(tier_mode: TierMode) -> Self {
        Self { tier_mode }
    }

    /// Evaluates one stored rate row against a base amount.
    pub fn component_for(
        &self,
        jurisdiction: &Jurisdiction,
        row: &TaxRateRow,
        base_amount: f64,
    ) -> TaxComponent {
        let (rate, tax_amount) = match row.rate_type.as_str() {
            "percentage" => {
                let pct = row.percentage_rate.unwrap_or(0.0);
                (pct, base_amount * pct / 100.0)
            }
            "fixed_amount" => {
                let fixed = row.fixed_amount.unwrap_or(0.0);
                if base_amount <= 0.0 {
                    tracing::debug!(
                        jurisdiction = %jurisdiction.code,
                        "fixed-amount rate applied to non-positive base"
                    );
                }
                (fixed, fixed)
            }
            "tiered" => {
                let tiers: Vec<Tier> = row
                    .tier_structure
                    .as_deref()
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or_default();
                let tax = evaluate_tiers(&tiers, base_amount, self.tier_mode);
                let effective = if base_amount > 0.0 {
                    tax / base_amount * 100.0
                } else {
                    0.0
                };
                (effective, tax)
            }
            other => {
                tracing::warn!(rate_type = other, "unknown rate type, treating as zero");
                (0.0, 0.0)
            }
        };

        TaxComponent {
            jurisdiction_name: jurisdiction.name.clone(),
            jurisdiction_type: jurisdiction.jurisdiction_type,
            tax_type: row.tax_type.clone(),
            rate,
            tax_amount,
            authority: row.external_id.clone().or_else(|| jurisdiction.external_id.clone()),
            estimated: false,
        }
    }

    /// Builds an estimated component from the national-average table.
    /// Returns `None` for types with no average (federal handled by the
    /// dedicated excise rule).
    pub fn estimated_component(
        &self,
        jurisdiction: &Jurisdiction,
        base_amount: f64,
    ) -> Option<TaxComponent> {
        let rate = national_average_rate(jurisdiction.jurisdiction_type)?;
        Some(TaxComponent {
            jurisdiction_name: jurisdiction.name.clone(),
            jurisdiction_type: jurisdiction.jurisdiction_type,
            tax_type: "sales".to_string(),
            rate,
            tax_amount: base_amount * rate / 100.0,
            authority: jurisdiction.external_id.clone(),
            estimated: true,
        })
    }

    /// Builds a state-level component from an external provider response,
    /// already normalized to percentages.
    pub fn component_from_provider(
        &self,
        jurisdiction: &Jurisdiction,
        combined_percentage: f64,
        base_amount: f64,
    ) -> TaxComponent {
        TaxComponent {
            jurisdiction_name: jurisdiction.name.clone(),
            jurisdiction_type: jurisdiction.jurisdiction_type,
            tax_type: "sales".to_string(),
            rate: combined_percentage,
            tax_amount: base_amount * combined_percentage / 100.0,
            authority: jurisdiction.external_id.clone(),
            estimated: false,
        }
    }

    /// Federal excise component when the threshold rule produces tax.
    pub fn federal_excise_component(&self, base_amount: f64) -> Option<TaxComponent> {
        let tax = federal_excise(base_amount);
        if tax == 0.0 {
            return None;
        }
        Some(TaxComponent {
            jurisdiction_name: "Federal Excise".to_string(),
            jurisdiction_type: JurisdictionType::Federal,
            tax_type: "excise".to_string(),
            rate: FEDERAL_EXCISE_RATE,
            tax_amount: tax,
            authority: None,
            estimated: false,
        })
    }
}

/// Synthesizes a federal stub jurisdiction for excise components.
pub fn federal_jurisdiction() -> Jurisdiction {
    Jurisdiction {
        id: None,
        code: "FEDERAL_US".to_string(),
        name: "Federal".to_string(),
        jurisdiction_type: JurisdictionType::Federal,
        state_code: "US".to_string(),
        priority: JurisdictionType::Federal.priority(),
        external_id: None,
        provenance: Provenance::Index,
    }
}
