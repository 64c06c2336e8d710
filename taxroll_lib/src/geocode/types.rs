//! Wire types for the geocoding provider.

use serde::{Deserialize, Serialize};

/// Administrative components of a geocoded place. City-like fields vary by
/// place class; [`AddressComponents::city_name`] picks the best available.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AddressComponents {
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub town: Option<String>,
    #[serde(default)]
    pub village: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postcode: Option<String>,
}

impl AddressComponents {
    /// The city-level name, whichever granularity the provider used.
    pub fn city_name(&self) -> Option<&str> {
        self.city
            .as_deref()
            .or(self.town.as_deref())
            .or(self.village.as_deref())
    }
}

/// One geocoded result. Coordinates arrive as strings on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeocodePlace {
    pub lat: String,
    pub lon: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub address: AddressComponents,
}

impl GeocodePlace {
    pub fn latitude(&self) -> Option<f64> {
        self.lat.parse().ok()
    }

    pub fn longitude(&self) -> Option<f64> {
        self.lon.parse().ok()
    }
}
