//! Wire types for the rate provider.

use serde::{Deserialize, Serialize};

/// Combined rate response for one location.
///
/// Depending on endpoint version the provider returns rates either as
/// decimals (`0.0625`) or percentages (`6.25`). [`RateResponse::as_percentages`]
/// normalizes to percentage form: any component below the cutoff is treated
/// as a decimal fraction and scaled by 100.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RateResponse {
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    pub state_rate: f64,
    #[serde(default)]
    pub county_rate: f64,
    #[serde(default)]
    pub city_rate: f64,
    /// Special-district and transit add-ons combined.
    #[serde(default)]
    pub additional_rate: f64,
    #[serde(default)]
    pub total_rate: Option<f64>,
}

/// No US state rate is below 1%, and no decimal-form rate reaches 0.15,
/// so 0.15 cleanly separates the two conventions for the state component.
const DECIMAL_FORM_CUTOFF: f64 = 0.15;

impl RateResponse {
    /// Returns a copy with every component expressed as a percentage.
    ///
    /// The convention is detected from `state_rate` alone: a response never
    /// mixes conventions, and sub-1% county/city components are common in
    /// percentage form so they cannot be judged individually.
    pub fn as_percentages(&self) -> RateResponse {
        if self.state_rate == 0.0 || self.state_rate >= DECIMAL_FORM_CUTOFF {
            return self.clone();
        }
        let scale = 100.0;
        RateResponse {
            state_rate: self.state_rate * scale,
            county_rate: self.county_rate * scale,
            city_rate: self.city_rate * scale,
            additional_rate: self.additional_rate * scale,
            total_rate: self.total_rate.map(|r| r * scale),
            ..self.clone()
        }
    }

    /// Sum of all components as a percentage, preferring the provider's
    /// own total when present.
    pub fn combined_percentage(&self) -> f64 {
        let norm = self.as_percentages();
        norm.total_rate
            .unwrap_or(norm.state_rate + norm.county_rate + norm.city_rate + norm.additional_rate)
    }
}
