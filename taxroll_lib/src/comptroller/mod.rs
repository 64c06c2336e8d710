//! Client and parsers for the state comptroller's bulk data service.
//!
//! Two feeds matter here: quarterly jurisdiction rate files (CSV) and
//! county address-range files (fixed-width records, ZIP-archived).
//! Downloads are a two-step flow: the first request answers with a
//! redirect to a signed URL, the second fetches the bytes.

pub mod client;
pub mod error;
pub mod types;

pub use client::ComptrollerClient;
pub use error::ComptrollerError;
pub use types::{parse_address_file, parse_rates_csv, AddressRecord, FileEntry, RateRecord};
