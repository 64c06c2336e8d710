//! Library layer for taxroll: US sales/VoIP tax determination and
//! allocation.
//!
//! Resolves taxing jurisdictions for a US address (local index, external
//! geocoding, statistical estimation), evaluates rates (stored tables,
//! an external pricing engine, national-average fallback), allocates tax
//! across bundled line items, and records every calculation for
//! compliance.

pub mod address;
pub mod allocation;
pub mod audit;
pub mod cache;
pub mod calculator;
pub mod comptroller;
pub mod db;
pub mod discovery;
pub mod error;
pub mod geocode;
pub mod import;
pub mod jurisdiction;
pub mod query_cache;
pub mod rate_limiter;
pub mod rates;
pub mod resolver;
pub mod retry;
pub mod vat;

pub use salestax_api;

pub use address::{Address, Parity};
pub use allocation::{
    AllocateOptions, AllocationMethod, AllocationResult, BundleItem, CustomerInfo,
    Recommendations, ServiceType, TaxClass,
};
pub use calculator::{CalcRequest, CalcType, TaxResult, TaxService};
pub use db::{Db, DbError};
pub use discovery::DiscoveryEngine;
pub use error::TaxError;
pub use jurisdiction::{Jurisdiction, JurisdictionType, Provenance};
pub use rates::{TaxComponent, TierMode};
