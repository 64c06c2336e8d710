//! Bundle tax allocation: splitting one tax obligation across
//! heterogeneous line items.
//!
//! Items are normalized to a canonical service-type set via an embedded
//! keyword table, then taxed under one of five strategies. Totals are
//! conserved: the per-item amounts always sum to the bundle total.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::Address;
use crate::audit;
use crate::calculator::{CalcRequest, CalcType, TaxService};
use crate::error::TaxError;
use crate::jurisdiction::JurisdictionType;
use crate::rates::{round_cents, FLAT_FALLBACK_RATE};

/// Errors in the embedded service-type seed data.
#[derive(Error, Debug)]
pub enum SeedDataError {
    #[error("TOML parse error: {0}")]
    TomlParse(String),
    #[error("Invalid seed data: {0}")]
    InvalidSeedData(String),
}

/// Canonical service classifications.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Equipment,
    Software,
    Voip,
    Internet,
    CloudServices,
    Monitoring,
    ManagedServices,
    Support,
    Consulting,
    Installation,
}

impl ServiceType {
    pub const ALL: [ServiceType; 10] = [
        ServiceType::Equipment,
        ServiceType::Software,
        ServiceType::Voip,
        ServiceType::Internet,
        ServiceType::CloudServices,
        ServiceType::Monitoring,
        ServiceType::ManagedServices,
        ServiceType::Support,
        ServiceType::Consulting,
        ServiceType::Installation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Equipment => "equipment",
            ServiceType::Software => "software",
            ServiceType::Voip => "voip",
            ServiceType::Internet => "internet",
            ServiceType::CloudServices => "cloud_services",
            ServiceType::Monitoring => "monitoring",
            ServiceType::ManagedServices => "managed_services",
            ServiceType::Support => "support",
            ServiceType::Consulting => "consulting",
            ServiceType::Installation => "installation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Maps an arbitrary input string to a canonical type: exact canonical
    /// names first, then the keyword table, defaulting to managed
    /// services (the platform's catch-all line class).
    pub fn normalize(raw: &str) -> Self {
        let lower = raw.trim().to_lowercase();
        if let Some(exact) = Self::parse(&lower) {
            return exact;
        }
        for (service_type, keywords) in keyword_table() {
            if keywords.iter().any(|k| lower.contains(k.as_str())) {
                return service_type;
            }
        }
        ServiceType::ManagedServices
    }

    /// Tax-priority weight ordering: tangible equipment highest, pure
    /// professional services lowest.
    pub fn priority(&self) -> i64 {
        match self {
            ServiceType::Equipment => 10,
            ServiceType::Installation => 9,
            ServiceType::Software => 8,
            ServiceType::Voip => 7,
            ServiceType::Internet => 6,
            ServiceType::CloudServices => 5,
            ServiceType::Monitoring => 4,
            ServiceType::ManagedServices => 3,
            ServiceType::Support => 2,
            ServiceType::Consulting => 1,
        }
    }

    /// Default tax class when the caller does not specify one.
    pub fn tax_class(&self) -> TaxClass {
        match self {
            ServiceType::Equipment => TaxClass::TangibleGoods,
            ServiceType::Software => TaxClass::DigitalGoods,
            ServiceType::Voip | ServiceType::Internet => TaxClass::Telecommunications,
            ServiceType::CloudServices | ServiceType::Monitoring | ServiceType::ManagedServices => {
                TaxClass::DigitalServices
            }
            ServiceType::Support | ServiceType::Consulting | ServiceType::Installation => {
                TaxClass::ProfessionalServices
            }
        }
    }
}

/// Tax classes with their rate multipliers for class-based allocation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaxClass {
    TangibleGoods,
    DigitalGoods,
    Telecommunications,
    DigitalServices,
    ProfessionalServices,
}

impl TaxClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxClass::TangibleGoods => "tangible_goods",
            TaxClass::DigitalGoods => "digital_goods",
            TaxClass::Telecommunications => "telecommunications",
            TaxClass::DigitalServices => "digital_services",
            TaxClass::ProfessionalServices => "professional_services",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            TaxClass::TangibleGoods,
            TaxClass::DigitalGoods,
            TaxClass::Telecommunications,
            TaxClass::DigitalServices,
            TaxClass::ProfessionalServices,
        ]
        .iter()
        .copied()
        .find(|c| c.as_str() == s)
    }

    /// Base-rate multiplier under class-based allocation.
    pub fn rate_multiplier(&self) -> f64 {
        match self {
            TaxClass::TangibleGoods => 1.0,
            TaxClass::DigitalGoods => 0.95,
            TaxClass::Telecommunications => 1.1,
            TaxClass::DigitalServices => 0.9,
            TaxClass::ProfessionalServices => 0.8,
        }
    }
}

#[derive(Deserialize)]
struct SeedMapping {
    service_type: String,
    keywords: Vec<String>,
}

#[derive(Deserialize)]
struct SeedFile {
    mapping: Vec<SeedMapping>,
}

/// Loads the embedded keyword table, validating every service type.
pub fn load_seed_keywords() -> Result<Vec<(ServiceType, Vec<String>)>, SeedDataError> {
    let content = include_str!("../../seed_data/service_types.toml");
    let file: SeedFile =
        toml::from_str(content).map_err(|e| SeedDataError::TomlParse(e.to_string()))?;
    let mut out = Vec::with_capacity(file.mapping.len());
    for entry in file.mapping {
        let service_type = ServiceType::parse(&entry.service_type).ok_or_else(|| {
            SeedDataError::InvalidSeedData(format!("unknown service type '{}'", entry.service_type))
        })?;
        out.push((service_type, entry.keywords));
    }
    Ok(out)
}

fn keyword_table() -> Vec<(ServiceType, Vec<String>)> {
    load_seed_keywords().unwrap_or_else(|e| {
        tracing::error!("service-type seed data invalid: {}", e);
        Vec::new()
    })
}

/// Allocation strategies.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
    Proportional,
    PriorityBased,
    ServiceType,
    TaxClass,
    Jurisdiction,
    /// Flat-estimate path used only when allocation itself failed.
    Fallback,
}

impl AllocationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationMethod::Proportional => "proportional",
            AllocationMethod::PriorityBased => "priority_based",
            AllocationMethod::ServiceType => "service_type",
            AllocationMethod::TaxClass => "tax_class",
            AllocationMethod::Jurisdiction => "jurisdiction",
            AllocationMethod::Fallback => "fallback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "proportional" => Some(AllocationMethod::Proportional),
            "priority_based" => Some(AllocationMethod::PriorityBased),
            "service_type" => Some(AllocationMethod::ServiceType),
            "tax_class" => Some(AllocationMethod::TaxClass),
            "jurisdiction" => Some(AllocationMethod::Jurisdiction),
            _ => None,
        }
    }
}

/// One line item of a bundle, as supplied by the caller.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BundleItem {
    #[serde(default)]
    pub description: Option<String>,
    pub service_type: String,
    #[serde(default)]
    pub tax_class: Option<String>,
    pub subtotal: f64,
    #[serde(default = "default_true")]
    pub taxable: bool,
    #[serde(default)]
    pub exempt: bool,
    /// Per-item service address for multi-location bundles.
    #[serde(default)]
    pub service_address: Option<Address>,
}

fn default_true() -> bool {
    true
}

/// Customer context for an allocation.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CustomerInfo {
    #[serde(default)]
    pub client_id: Option<String>,
    pub address: Address,
}

/// Options for an allocation call.
#[derive(Debug, Clone, Default)]
pub struct AllocateOptions {
    /// Explicit method; `None` selects automatically.
    pub method: Option<AllocationMethod>,
    pub calculation_type: CalcType,
}

/// A normalized item ready for allocation.
#[derive(Debug, Clone)]
struct NormalizedItem {
    service_type: ServiceType,
    tax_class: TaxClass,
    subtotal: f64,
    priority: i64,
    taxable: bool,
    exempt: bool,
    service_address: Option<Address>,
}

/// Allocation outcome for one item.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ItemAllocation {
    pub description: Option<String>,
    pub service_type: ServiceType,
    pub tax_class: TaxClass,
    pub subtotal: f64,
    pub tax_rate: f64,
    pub tax_amount: f64,
    pub allocation_method: AllocationMethod,
}

/// Bundle-level totals.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BundleTotals {
    pub subtotal: f64,
    pub total_tax: f64,
    pub grand_total: f64,
    pub effective_tax_rate: f64,
}

/// Per-service-type rollup.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServiceTypeSummary {
    pub service_type: ServiceType,
    pub subtotal: f64,
    pub tax_amount: f64,
}

/// Jurisdiction involved in the bundle's default resolution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JurisdictionSummary {
    pub name: String,
    pub jurisdiction_type: JurisdictionType,
    pub estimated: bool,
}

/// Full allocation result.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AllocationResult {
    pub allocation_method: AllocationMethod,
    pub bundle_totals: BundleTotals,
    pub item_allocations: Vec<ItemAllocation>,
    pub jurisdiction_summary: Vec<JurisdictionSummary>,
    pub service_type_summary: Vec<ServiceTypeSummary>,
    /// True when the flat-estimate fallback replaced real allocation.
    pub fallback_used: bool,
}

/// Advisory output of [`TaxService::bundle_recommendations`].
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Recommendations {
    /// 0-10; higher means more moving parts in the bundle.
    pub complexity_score: u32,
    pub risk_factors: Vec<String>,
    pub suggestions: Vec<String>,
}

impl TaxService {
    /// Allocates taxes across a bundle of line items and writes one audit
    /// summary record for the whole bundle.
    ///
    /// Validation errors surface; any internal failure degrades to a flat
    /// proportional estimate tagged as `fallback`.
    pub async fn allocate(
        &self,
        items: &[BundleItem],
        customer: &CustomerInfo,
        options: &AllocateOptions,
    ) -> Result<AllocationResult, TaxError> {
        validate_items(items)?;

        let result = match self.allocate_inner(items, customer, options).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("allocation failed, using flat estimate: {}", e);
                fallback_allocation(items)
            }
        };

        audit::record_allocation(&self.db, &self.tenant, items, customer, options, &result);
        Ok(result)
    }

    async fn allocate_inner(
        &self,
        items: &[BundleItem],
        customer: &CustomerInfo,
        options: &AllocateOptions,
    ) -> Result<AllocationResult, TaxError> {
        let normalized = normalize_items(items);
        let method = options
            .method
            .unwrap_or_else(|| select_method(&normalized));

        // Rate per distinct service type at the bundle address, computed
        // through the full calculator (no audit per lookup).
        let mut type_rates: Vec<(ServiceType, f64, bool)> = Vec::new();
        for service_type in distinct_types(&normalized) {
            let type_subtotal: f64 = normalized
                .iter()
                .filter(|i| i.service_type == service_type)
                .map(|i| i.subtotal)
                .sum();
            let result = self
                .calculate_inner(&CalcRequest {
                    amount: type_subtotal.max(1.0),
                    service_type: service_type.as_str().to_string(),
                    address: customer.address.clone(),
                    client_id: customer.client_id.clone(),
                    subject_ref: None,
                    calculation_type: CalcType::Preview,
                    include_federal_excise: false,
                    include_usf: false,
                })
                .await?;
            type_rates.push((service_type, result.effective_rate, result.estimated));
        }
        let rate_for = |t: ServiceType| -> f64 {
            type_rates
                .iter()
                .find(|(ty, _, _)| *ty == t)
                .map(|(_, r, _)| *r)
                .unwrap_or(0.0)
        };

        // Jurisdiction summary from the bundle address resolution.
        let jurisdictions = self.resolve_jurisdictions(&customer.address).await;
        let jurisdiction_summary: Vec<JurisdictionSummary> = jurisdictions
            .iter()
            .map(|j| JurisdictionSummary {
                name: j.name.clone(),
                jurisdiction_type: j.jurisdiction_type,
                estimated: j.provenance == crate::jurisdiction::Provenance::Estimated,
            })
            .collect();

        let (min_priority, max_priority) = priority_bounds(&normalized);

        let mut item_allocations = Vec::with_capacity(items.len());
        for (input, item) in items.iter().zip(normalized.iter()) {
            let tax_rate = if !item.taxable || item.exempt {
                0.0
            } else {
                match method {
                    AllocationMethod::Proportional | AllocationMethod::ServiceType => {
                        rate_for(item.service_type)
                    }
                    AllocationMethod::PriorityBased => {
                        let weight = priority_weight(item.priority, min_priority, max_priority);
                        rate_for(item.service_type) * weight
                    }
                    AllocationMethod::TaxClass => {
                        rate_for(item.service_type) * item.tax_class.rate_multiplier()
                    }
                    AllocationMethod::Jurisdiction => match &item.service_address {
                        Some(address) => {
                            self.item_jurisdiction_rate(item, address, customer).await?
                        }
                        None => rate_for(item.service_type),
                    },
                    AllocationMethod::Fallback => FLAT_FALLBACK_RATE,
                }
            };

            item_allocations.push(ItemAllocation {
                description: input.description.clone(),
                service_type: item.service_type,
                tax_class: item.tax_class,
                subtotal: item.subtotal,
                tax_rate,
                tax_amount: round_cents(item.subtotal * tax_rate / 100.0),
                allocation_method: method,
            });
        }

        Ok(assemble_result(
            method,
            item_allocations,
            jurisdiction_summary,
            false,
        ))
    }

    async fn item_jurisdiction_rate(
        &self,
        item: &NormalizedItem,
        address: &Address,
        customer: &CustomerInfo,
    ) -> Result<f64, TaxError> {
        let result = self
            .calculate_inner(&CalcRequest {
                amount: item.subtotal.max(1.0),
                service_type: item.service_type.as_str().to_string(),
                address: address.clone(),
                client_id: customer.client_id.clone(),
                subject_ref: None,
                calculation_type: CalcType::Preview,
                include_federal_excise: false,
                include_usf: false,
            })
            .await?;
        Ok(result.effective_rate)
    }

    /// Read-only advisory: complexity, risk factors, and suggestions for
    /// a prospective bundle. Never blocks allocation.
    pub fn bundle_recommendations(
        &self,
        items: &[BundleItem],
        customer: &CustomerInfo,
    ) -> Result<Recommendations, TaxError> {
        validate_items(items)?;
        let normalized = normalize_items(items);
        Ok(build_recommendations(items, &normalized, customer))
    }
}

fn validate_items(items: &[BundleItem]) -> Result<(), TaxError> {
    if items.is_empty() {
        return Err(TaxError::Validation("bundle has no items".into()));
    }
    for (i, item) in items.iter().enumerate() {
        if !item.subtotal.is_finite() || item.subtotal < 0.0 {
            return Err(TaxError::Validation(format!(
                "item {} subtotal must be a non-negative number",
                i
            )));
        }
    }
    Ok(())
}

fn normalize_items(items: &[BundleItem]) -> Vec<NormalizedItem> {
    items
        .iter()
        .map(|item| {
            let service_type = ServiceType::normalize(&item.service_type);
            let tax_class = item
                .tax_class
                .as_deref()
                .and_then(TaxClass::parse)
                .unwrap_or_else(|| service_type.tax_class());
            NormalizedItem {
                service_type,
                tax_class,
                subtotal: item.subtotal,
                priority: service_type.priority(),
                taxable: item.taxable,
                exempt: item.exempt,
                service_address: item.service_address.clone(),
            }
        })
        .collect()
}

fn distinct_types(items: &[NormalizedItem]) -> Vec<ServiceType> {
    let mut out: Vec<ServiceType> = Vec::new();
    for item in items {
        if !out.contains(&item.service_type) {
            out.push(item.service_type);
        }
    }
    out
}

fn distinct_classes(items: &[NormalizedItem]) -> Vec<TaxClass> {
    let mut out: Vec<TaxClass> = Vec::new();
    for item in items {
        if !out.contains(&item.tax_class) {
            out.push(item.tax_class);
        }
    }
    out
}

/// Automatic method selection: homogeneous bundles stay proportional,
/// equipment mixed with services weighs by priority, wide mixes group by
/// service type.
fn select_method(items: &[NormalizedItem]) -> AllocationMethod {
    let types = distinct_types(items);
    let classes = distinct_classes(items);

    if types.len() == 1 && classes.len() == 1 {
        return AllocationMethod::Proportional;
    }
    if types.len() >= 2 && types.contains(&ServiceType::Equipment) {
        return AllocationMethod::PriorityBased;
    }
    if types.len() > 2 {
        return AllocationMethod::ServiceType;
    }
    AllocationMethod::Proportional
}

fn priority_bounds(items: &[NormalizedItem]) -> (i64, i64) {
    let min = items.iter().map(|i| i.priority).min().unwrap_or(0);
    let max = items.iter().map(|i| i.priority).max().unwrap_or(0);
    (min, max)
}

/// Priority weight in [0.3, 1.0]: the highest-priority item keeps its
/// full rate, lower priorities scale down, all-equal bundles stay at 1.
fn priority_weight(priority: i64, min: i64, max: i64) -> f64 {
    if max == min {
        return 1.0;
    }
    0.3 + 0.7 * (priority - min) as f64 / (max - min) as f64
}

fn assemble_result(
    method: AllocationMethod,
    item_allocations: Vec<ItemAllocation>,
    jurisdiction_summary: Vec<JurisdictionSummary>,
    fallback_used: bool,
) -> AllocationResult {
    let subtotal: f64 = item_allocations.iter().map(|a| a.subtotal).sum();
    let total_tax = round_cents(item_allocations.iter().map(|a| a.tax_amount).sum());
    let effective_tax_rate = if subtotal > 0.0 {
        total_tax / subtotal * 100.0
    } else {
        0.0
    };

    let mut service_type_summary: Vec<ServiceTypeSummary> = Vec::new();
    for allocation in &item_allocations {
        match service_type_summary
            .iter_mut()
            .find(|s| s.service_type == allocation.service_type)
        {
            Some(summary) => {
                summary.subtotal += allocation.subtotal;
                summary.tax_amount = round_cents(summary.tax_amount + allocation.tax_amount);
            }
            None => service_type_summary.push(ServiceTypeSummary {
                service_type: allocation.service_type,
                subtotal: allocation.subtotal,
                tax_amount: allocation.tax_amount,
            }),
        }
    }

    AllocationResult {
        allocation_method: method,
        bundle_totals: BundleTotals {
            subtotal,
            total_tax,
            grand_total: round_cents(subtotal + total_tax),
            effective_tax_rate,
        },
        item_allocations,
        jurisdiction_summary,
        service_type_summary,
        fallback_used,
    }
}

/// Flat proportional estimate over raw item prices, used when real
/// allocation failed. Clearly tagged; an audit record is still written.
fn fallback_allocation(items: &[BundleItem]) -> AllocationResult {
    let item_allocations: Vec<ItemAllocation> = items
        .iter()
        .map(|item| {
            let service_type = ServiceType::normalize(&item.service_type);
            ItemAllocation {
                description: item.description.clone(),
                service_type,
                tax_class: service_type.tax_class(),
                subtotal: item.subtotal,
                tax_rate: FLAT_FALLBACK_RATE,
                tax_amount: round_cents(item.subtotal * FLAT_FALLBACK_RATE / 100.0),
                allocation_method: AllocationMethod::Fallback,
            }
        })
        .collect();
    assemble_result(AllocationMethod::Fallback, item_allocations, Vec::new(), true)
}

fn build_recommendations(
    items: &[BundleItem],
    normalized: &[NormalizedItem],
    customer: &CustomerInfo,
) -> Recommendations {
    let types = distinct_types(normalized);
    let classes = distinct_classes(normalized);
    let multi_address = items
        .iter()
        .filter_map(|i| i.service_address.as_ref())
        .any(|a| a.state_code() != customer.address.state_code() || a.zip5() != customer.address.zip5());
    let has_exemptions = normalized.iter().any(|i| i.exempt);

    let mut score = types.len() as u32 * 2 + classes.len() as u32 * 3;
    if multi_address {
        score += 5;
    }
    if has_exemptions {
        score += 3;
    }
    let complexity_score = score.min(10);

    let mut risk_factors = Vec::new();
    if types.contains(&ServiceType::Voip) {
        risk_factors.push("telecom items attract federal excise and USF obligations".to_string());
    }
    if multi_address {
        risk_factors.push("multiple service addresses span jurisdictions".to_string());
    }
    if has_exemptions {
        risk_factors.push("exempt items require certificate documentation".to_string());
    }
    if classes.len() > 2 {
        risk_factors.push("mixed tax classes complicate audit defense".to_string());
    }

    let mut suggestions = Vec::new();
    if types.len() > 3 {
        suggestions.push("split the bundle by service type for cleaner reporting".to_string());
    }
    if types.contains(&ServiceType::Equipment) && types.len() >= 2 {
        suggestions.push("itemize equipment separately to preserve its full tax basis".to_string());
    }
    if multi_address {
        suggestions.push("use jurisdiction allocation for per-location accuracy".to_string());
    }

    Recommendations {
        complexity_score,
        risk_factors,
        suggestions,
    }
}
