//! Wire types for the VAT provider.

use serde::{Deserialize, Serialize};

/// Result of validating a VAT registration number.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VatCheck {
    pub valid: bool,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
}

/// VAT rates for a country.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CountryRates {
    pub country_code: String,
    pub standard_rate: f64,
    #[serde(default)]
    pub reduced_rates: Vec<f64>,
}
