//! Geocoding adapter for a Nominatim-class provider.
//!
//! Used as the second resolution tier when the local address index has no
//! hit: the provider's administrative components (county, city, state)
//! become jurisdiction stubs. Courtesy-limited: callers must hold a slot
//! from the shared rate limiter (>=1s spacing) before calling.

pub mod client;
pub mod error;
pub mod types;

pub use client::GeocodeClient;
pub use error::GeocodeError;
pub use types::{AddressComponents, GeocodePlace};
