//! Street-address parsing and normalization for index lookups.

use serde::{Deserialize, Serialize};

/// A free-form US service address as supplied by callers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Address {
    pub line1: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

impl Address {
    pub fn new(line1: &str, city: &str, state: &str, zip: &str) -> Self {
        Address {
            line1: line1.to_string(),
            city: city.to_string(),
            state: state.to_string(),
            zip: zip.to_string(),
        }
    }

    /// Two-letter uppercase state code, trimmed.
    pub fn state_code(&self) -> String {
        self.state.trim().to_uppercase()
    }

    /// Five-digit zip (strips a +4 suffix).
    pub fn zip5(&self) -> String {
        let digits: String = self.zip.chars().filter(|c| c.is_ascii_digit()).collect();
        digits.chars().take(5).collect()
    }
}

/// Street-number parity filter on an address range.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    Even,
    Odd,
    Both,
}

impl Parity {
    pub fn parse(s: &str) -> Parity {
        match s.trim().to_lowercase().as_str() {
            "even" | "e" => Parity::Even,
            "odd" | "o" => Parity::Odd,
            _ => Parity::Both,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Parity::Even => "even",
            Parity::Odd => "odd",
            Parity::Both => "both",
        }
    }

    /// Whether `number` satisfies this parity filter.
    pub fn matches(&self, number: i64) -> bool {
        match self {
            Parity::Both => true,
            Parity::Even => number % 2 == 0,
            Parity::Odd => number % 2 != 0,
        }
    }
}

/// Street designators stripped when they appear mid-string in a street
/// name ("MAIN ST CROSSING" -> "MAIN CROSSING") and recognized as a
/// trailing suffix during parsing.
const STREET_DESIGNATORS: &[&str] = &[
    "ST", "STREET", "AVE", "AVENUE", "RD", "ROAD", "DR", "DRIVE", "LN", "LANE", "BLVD",
    "BOULEVARD", "CT", "COURT", "PL", "PLACE", "PKWY", "PARKWAY", "HWY", "HIGHWAY", "CIR",
    "CIRCLE", "TRL", "TRAIL", "WAY", "LOOP", "XING", "CROSSING",
];

const DIRECTIONS: &[&str] = &["N", "S", "E", "W", "NE", "NW", "SE", "SW"];

/// A parsed street line, ready for an address-range index lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStreet {
    pub number: i64,
    /// Normalized street name (uppercase, punctuation stripped,
    /// mid-string designators removed).
    pub name: String,
    pub pre_direction: Option<String>,
    pub suffix: Option<String>,
    /// Elision alternate with punctuation replaced by a space, when it
    /// differs from `name`.
    spaced_elision: Option<String>,
}

impl ParsedStreet {
    /// Street parity of the parsed number.
    pub fn parity(&self) -> Parity {
        if self.number % 2 == 0 {
            Parity::Even
        } else {
            Parity::Odd
        }
    }

    /// Name spellings to try against the index: the normalized form plus
    /// elision alternates ("O'CONNOR" is stored as either "OCONNOR" or
    /// "O CONNOR" depending on the data source's own normalization).
    pub fn name_alternates(&self) -> Vec<String> {
        let mut alternates = vec![self.name.clone()];
        if let Some(spaced) = &self.spaced_elision {
            if !alternates.contains(spaced) {
                alternates.push(spaced.clone());
            }
        }
        alternates
    }
}

/// Parses a street line ("1100 N O'Connor Rd") into number, normalized
/// name, optional pre-direction, and optional suffix. Returns `None` when
/// no leading street number is present.
pub fn parse_street(line1: &str) -> Option<ParsedStreet> {
    let cleaned = line1.trim();
    if cleaned.is_empty() {
        return None;
    }

    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    let number: i64 = tokens
        .first()?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .ok()?;

    let mut rest: Vec<String> = tokens[1..]
        .iter()
        .map(|t| t.to_uppercase())
        .collect();
    if rest.is_empty() {
        return None;
    }

    let mut pre_direction = None;
    if rest.len() > 1 && DIRECTIONS.contains(&rest[0].as_str()) {
        pre_direction = Some(rest.remove(0));
    }

    let mut suffix = None;
    if rest.len() > 1 {
        let last = strip_punctuation(rest.last().unwrap());
        if STREET_DESIGNATORS.contains(&last.as_str()) {
            suffix = Some(canonical_suffix(&last));
            rest.pop();
        }
    }

    let raw_name = rest.join(" ");
    let name = normalize_street_name(&raw_name);
    if name.is_empty() {
        return None;
    }
    let spaced = spaced_elision(&raw_name);

    Some(ParsedStreet {
        number,
        name,
        pre_direction,
        suffix,
        spaced_elision: spaced,
    })
}

/// Uppercases, strips punctuation, drops designators appearing mid-string,
/// and collapses whitespace.
pub fn normalize_street_name(name: &str) -> String {
    let upper = name.to_uppercase();
    let words: Vec<String> = upper
        .split_whitespace()
        .map(|w| strip_punctuation(w))
        .filter(|w| !w.is_empty())
        .collect();
    let last = words.len().saturating_sub(1);
    let kept: Vec<&String> = words
        .iter()
        .enumerate()
        .filter(|(i, w)| {
            // Only mid-string designators are dropped: "AVENUE B" is a
            // street named Avenue B, and a trailing designator is part of
            // the name once the suffix has already been split off.
            *i == 0 || *i == last || !STREET_DESIGNATORS.contains(&w.as_str())
        })
        .map(|(_, w)| w)
        .collect();
    kept.iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Elision alternate where punctuation becomes a space instead of being
/// removed: "O'CONNOR" -> "O CONNOR". Returns `None` when identical to
/// plain normalization.
fn spaced_elision(name: &str) -> Option<String> {
    if !name.contains(['\'', '-', '.']) {
        return None;
    }
    let replaced: String = name
        .to_uppercase()
        .chars()
        .map(|c| if c == '\'' || c == '-' || c == '.' { ' ' } else { c })
        .collect();
    let spaced = normalize_street_name(&replaced);
    let plain = normalize_street_name(name);
    if spaced == plain {
        None
    } else {
        Some(spaced)
    }
}

fn strip_punctuation(word: &str) -> String {
    word.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Maps long designator spellings to the abbreviated form used by the
/// official address files.
fn canonical_suffix(designator: &str) -> String {
    match designator {
        "STREET" => "ST",
        "AVENUE" => "AVE",
        "ROAD" => "RD",
        "DRIVE" => "DR",
        "LANE" => "LN",
        "BOULEVARD" => "BLVD",
        "COURT" => "CT",
        "PLACE" => "PL",
        "PARKWAY" => "PKWY",
        "HIGHWAY" => "HWY",
        "CIRCLE" => "CIR",
        "TRAIL" => "TRL",
        "CROSSING" => "XING",
        other => other,
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_line() {
        let p = parse_street("1100 Congress Ave").unwrap();
        assert_eq!(p.number, 1100);
        assert_eq!(p.name, "CONGRESS");
        assert_eq!(p.suffix.as_deref(), Some("AVE"));
        assert_eq!(p.pre_direction, None);
    }

    #[test]
    fn parses_pre_direction_and_long_suffix() {
        let p = parse_street("742 N Main Street").unwrap();
        assert_eq!(p.pre_direction.as_deref(), Some("N"));
        assert_eq!(p.name, "MAIN");
        assert_eq!(p.suffix.as_deref(), Some("ST"));
    }

    #[test]
    fn elision_alternates() {
        let p = parse_street("15 O'Connor Rd").unwrap();
        assert_eq!(p.name, "OCONNOR");
        let alts = p.name_alternates();
        assert!(alts.contains(&"OCONNOR".to_string()));
        assert!(alts.contains(&"O CONNOR".to_string()));
    }

    #[test]
    fn mid_string_designator_stripped() {
        assert_eq!(normalize_street_name("Main St Crossing"), "MAIN CROSSING");
    }

    #[test]
    fn leading_designator_word_kept() {
        // "Avenue B" is the street's actual name.
        assert_eq!(normalize_street_name("Avenue B"), "AVENUE B");
    }

    #[test]
    fn no_number_returns_none() {
        assert!(parse_street("PO Box 99").is_none());
        assert!(parse_street("Main Street").is_none());
        assert!(parse_street("").is_none());
    }

    #[test]
    fn parity_filtering() {
        assert!(Parity::Even.matches(1100));
        assert!(!Parity::Even.matches(1101));
        assert!(Parity::Odd.matches(1101));
        assert!(!Parity::Odd.matches(1100));
        assert!(Parity::Both.matches(1100));
        assert!(Parity::Both.matches(1101));
    }

    #[test]
    fn zip5_strips_plus4() {
        let a = Address::new("1 Main St", "Austin", "tx", "78701-4321");
        assert_eq!(a.zip5(), "78701");
        assert_eq!(a.state_code(), "TX");
    }
}
