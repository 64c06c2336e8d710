//! Client for the SalesTax rate provider API.
//!
//! Thin async HTTP client returning combined state/county/city/district
//! sales-tax rates for a US zip code or city+state pair. The provider
//! returns rates in either decimal (0.0625) or percentage (6.25) form
//! depending on endpoint version; [`RateResponse`] normalizes both.

pub mod client;
pub mod errors;
pub mod query;
pub mod types;

pub use client::Client;
pub use errors::Error;
pub use query::RateQuery;
pub use types::RateResponse;
