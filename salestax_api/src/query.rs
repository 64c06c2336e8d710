//! Query builder for rate lookups.

use url::Url;

/// Location selector for a rate lookup: either a 5-digit zip code or a
/// city + two-letter state pair.
#[derive(Clone, Debug, PartialEq)]
pub enum Location {
    Zip(String),
    CityState { city: String, state: String },
}

/// Builder for a rate lookup request.
#[derive(Clone, Debug)]
pub struct RateQuery {
    location: Location,
    /// Optional provider-side service category hint (e.g. "telecom").
    category: Option<String>,
}

impl RateQuery {
    /// Query rates for a 5-digit zip code.
    pub fn by_zip(zip: impl Into<String>) -> Self {
        Self {
            location: Location::Zip(zip.into()),
            category: None,
        }
    }

    /// Query rates for a city + state pair.
    pub fn by_city_state(city: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            location: Location::CityState {
                city: city.into(),
                state: state.into(),
            },
            category: None,
        }
    }

    /// Sets the provider-side service category hint.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// The location this query targets.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Appends this query's parameters to the given URL, returning the
    /// modified URL.
    pub fn add_to_url(&self, url: &Url) -> Url {
        let mut url = url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            match &self.location {
                Location::Zip(zip) => {
                    pairs.append_pair("zip_code", zip);
                }
                Location::CityState { city, state } => {
                    pairs.append_pair("city", city);
                    pairs.append_pair("state", state);
                }
            }
            if let Some(ref category) = self.category {
                pairs.append_pair("category", category);
            }
        }
        url
    }

    /// Stable canonical form of this query's parameters, used by callers
    /// as a cache-key fragment.
    pub fn cache_key(&self) -> String {
        let mut parts = Vec::new();
        match &self.location {
            Location::Zip(zip) => parts.push(format!("zip={}", zip)),
            Location::CityState { city, state } => {
                parts.push(format!("city={}", city.to_lowercase()));
                parts.push(format!("state={}", state.to_uppercase()));
            }
        }
        if let Some(ref category) = self.category {
            parts.push(format!("category={}", category));
        }
        parts.join("&")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_query_url() {
        let url = Url::parse("https://example.com/rates").unwrap();
        let q = RateQuery::by_zip("78701");
        let built = q.add_to_url(&url);
        assert_eq!(built.query(), Some("zip_code=78701"));
    }

    #[test]
    fn city_state_query_url() {
        let url = Url::parse("https://example.com/rates").unwrap();
        let q = RateQuery::by_city_state("Austin", "TX").with_category("telecom");
        let built = q.add_to_url(&url);
        assert_eq!(built.query(), Some("city=Austin&state=TX&category=telecom"));
    }

    #[test]
    fn cache_key_is_normalized() {
        let q = RateQuery::by_city_state("Austin", "tx");
        assert_eq!(q.cache_key(), "city=austin&state=TX");
    }
}
