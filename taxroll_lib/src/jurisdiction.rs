//! Jurisdiction value types: taxing authorities and their layering.

use serde::{Deserialize, Serialize};

/// Kind of taxing authority. The numeric priority orders layers in a
/// breakdown (federal first, districts last).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JurisdictionType {
    Federal,
    State,
    County,
    City,
    TransitAuthority,
    SpecialDistrict,
    CongressionalDistrict,
}

impl JurisdictionType {
    /// Layer priority: federal=1, state=2, county=3, city=4, transit=5,
    /// special_district=6, congressional_district=7.
    pub fn priority(&self) -> i64 {
        match self {
            JurisdictionType::Federal => 1,
            JurisdictionType::State => 2,
            JurisdictionType::County => 3,
            JurisdictionType::City => 4,
            JurisdictionType::TransitAuthority => 5,
            JurisdictionType::SpecialDistrict => 6,
            JurisdictionType::CongressionalDistrict => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JurisdictionType::Federal => "federal",
            JurisdictionType::State => "state",
            JurisdictionType::County => "county",
            JurisdictionType::City => "city",
            JurisdictionType::TransitAuthority => "transit_authority",
            JurisdictionType::SpecialDistrict => "special_district",
            JurisdictionType::CongressionalDistrict => "congressional_district",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "federal" => Some(JurisdictionType::Federal),
            "state" => Some(JurisdictionType::State),
            "county" => Some(JurisdictionType::County),
            "city" => Some(JurisdictionType::City),
            "transit_authority" => Some(JurisdictionType::TransitAuthority),
            "special_district" => Some(JurisdictionType::SpecialDistrict),
            "congressional_district" => Some(JurisdictionType::CongressionalDistrict),
            _ => None,
        }
    }
}

/// How a jurisdiction entered a resolution result. Estimated entries are
/// never presented as equivalent to an exact index hit; the tag survives
/// into the breakdown.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Exact hit in the local address-range index.
    Index,
    /// Derived from external geocoder components.
    Geocoded,
    /// Statistical guess from imported data.
    Estimated,
}

/// A taxing authority. `(code, state_code)` is unique; rows are never
/// deleted, only deactivated during data-source reconciliation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Jurisdiction {
    /// Storage rowid; `None` for stubs synthesized during resolution.
    pub id: Option<i64>,
    pub code: String,
    pub name: String,
    pub jurisdiction_type: JurisdictionType,
    pub state_code: String,
    pub priority: i64,
    /// Upstream authority identifier (e.g. a TAID), opaque here.
    pub external_id: Option<String>,
    pub provenance: Provenance,
}

impl Jurisdiction {
    /// Builds a stub for an authority known only by name, generating a
    /// `TYPE_NORMALIZEDNAME` code when no stored code exists.
    pub fn stub(
        name: &str,
        jurisdiction_type: JurisdictionType,
        state_code: &str,
        provenance: Provenance,
    ) -> Self {
        Jurisdiction {
            id: None,
            code: generate_code(jurisdiction_type, name),
            name: name.to_string(),
            jurisdiction_type,
            state_code: state_code.to_uppercase(),
            priority: jurisdiction_type.priority(),
            external_id: None,
            provenance,
        }
    }

    /// Dedup key within a resolution result.
    pub fn dedup_key(&self) -> (String, String) {
        (self.code.clone(), self.state_code.clone())
    }
}

/// Generates a `TYPE_NORMALIZEDNAME` jurisdiction code: uppercase, runs of
/// non-alphanumerics collapsed to a single underscore.
pub fn generate_code(jurisdiction_type: JurisdictionType, name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            normalized.push(ch.to_ascii_uppercase());
            last_was_sep = false;
        } else if !last_was_sep {
            normalized.push('_');
            last_was_sep = true;
        }
    }
    let normalized = normalized.trim_end_matches('_');
    format!(
        "{}_{}",
        jurisdiction_type.as_str().to_uppercase(),
        normalized
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_layering() {
        assert!(JurisdictionType::Federal.priority() < JurisdictionType::State.priority());
        assert!(JurisdictionType::City.priority() < JurisdictionType::SpecialDistrict.priority());
        assert_eq!(JurisdictionType::SpecialDistrict.priority(), 6);
    }

    #[test]
    fn type_round_trips() {
        for t in [
            JurisdictionType::Federal,
            JurisdictionType::State,
            JurisdictionType::County,
            JurisdictionType::City,
            JurisdictionType::TransitAuthority,
            JurisdictionType::SpecialDistrict,
            JurisdictionType::CongressionalDistrict,
        ] {
            assert_eq!(JurisdictionType::parse(t.as_str()), Some(t));
        }
        assert_eq!(JurisdictionType::parse("parish"), None);
    }

    #[test]
    fn generated_codes() {
        assert_eq!(
            generate_code(JurisdictionType::City, "San Antonio"),
            "CITY_SAN_ANTONIO"
        );
        assert_eq!(
            generate_code(JurisdictionType::SpecialDistrict, "Travis Co. ESD #4"),
            "SPECIAL_DISTRICT_TRAVIS_CO_ESD_4"
        );
    }

    #[test]
    fn stub_carries_provenance() {
        let j = Jurisdiction::stub(
            "Harris County",
            JurisdictionType::County,
            "tx",
            Provenance::Geocoded,
        );
        assert_eq!(j.code, "COUNTY_HARRIS_COUNTY");
        assert_eq!(j.state_code, "TX");
        assert_eq!(j.provenance, Provenance::Geocoded);
        assert_eq!(j.priority, 3);
    }
}
