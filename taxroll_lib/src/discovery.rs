//! Heuristic jurisdiction discovery: name-pattern mining and code
//! resolution for authorities that arrive without a stored code.
//!
//! Patterns are learned from the jurisdiction names already imported, not
//! from any hardcoded list. Every result carries a confidence score and is
//! treated as an estimate by callers, never as an exact index hit.

use std::collections::HashMap;
use std::sync::Mutex;

use regex::Regex;

use crate::db::{Db, DbError, ZipStatColumn};
use crate::jurisdiction::{generate_code, Jurisdiction, JurisdictionType, Provenance};

/// Minimum token frequency for a token to count as a type indicator.
const TOKEN_SUPPORT_THRESHOLD: usize = 2;

/// Fraction of a pattern's terms that must appear in a query name.
const PATTERN_TERM_THRESHOLD: f64 = 0.7;

/// A query authority name must be at least this fraction of a candidate
/// jurisdiction name's length for a partial match to count. Blocks
/// short-substring false positives ("ANTON" vs "SAN ANTONIO").
const PARTIAL_LENGTH_RATIO: f64 = 0.5;

/// A name pattern mined from imported jurisdiction data.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub terms: Vec<String>,
    pub jurisdiction_type: JurisdictionType,
    pub confidence: f64,
}

/// How a code was resolved, in decreasing order of reliability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    ExactCode,
    ExactName,
    PartialName,
    Pattern,
    IdPassthrough,
}

/// A resolved code with its confidence and the tier that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeMatch {
    pub code: String,
    pub confidence: f64,
    pub tier: MatchTier,
}

/// Discovery engine with an explicit, lazily-populated pattern cache owned
/// by the instance (no process-wide statics; invalidation is testable).
pub struct DiscoveryEngine {
    patterns: Mutex<Option<Vec<Pattern>>>,
}

impl Default for DiscoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryEngine {
    pub fn new() -> Self {
        Self {
            patterns: Mutex::new(None),
        }
    }

    /// Drops the cached pattern set; the next call re-mines from storage.
    pub fn invalidate(&self) {
        *self.patterns.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Returns the mined pattern set, populating the cache on first use.
    pub fn patterns(&self, db: &Db) -> Result<Vec<Pattern>, DbError> {
        let mut guard = self.patterns.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ref cached) = *guard {
            return Ok(cached.clone());
        }
        let mined = discover_patterns(db)?;
        *guard = Some(mined.clone());
        Ok(mined)
    }

    /// Resolves a jurisdiction code for an authority name + id.
    ///
    /// Tier order: exact code, exact name (case-insensitive), partial name
    /// behind the length-ratio guard, mined pattern (>=70% of terms),
    /// numeric authority-id passthrough (>=3 digits). Unresolvable pairs
    /// are recorded for future learning and yield `None`.
    pub fn find_code(
        &self,
        db: &Db,
        state_code: &str,
        authority_name: &str,
        authority_id: Option<&str>,
    ) -> Result<Option<CodeMatch>, DbError> {
        let query = authority_name.trim().to_uppercase();
        if query.is_empty() {
            return Ok(None);
        }
        let candidates = db.jurisdictions_for_matching(state_code)?;

        for j in &candidates {
            if j.code.eq_ignore_ascii_case(&query) {
                return Ok(Some(CodeMatch {
                    code: j.code.clone(),
                    confidence: 1.0,
                    tier: MatchTier::ExactCode,
                }));
            }
        }

        for j in &candidates {
            if j.name.eq_ignore_ascii_case(&query) {
                return Ok(Some(CodeMatch {
                    code: j.code.clone(),
                    confidence: 1.0,
                    tier: MatchTier::ExactName,
                }));
            }
        }

        if let Some(m) = best_partial_match(&query, &candidates) {
            return Ok(Some(m));
        }

        for pattern in self.patterns(db)? {
            if pattern_matches(&pattern, &query) {
                return Ok(Some(CodeMatch {
                    code: generate_code(pattern.jurisdiction_type, &query),
                    confidence: pattern.confidence,
                    tier: MatchTier::Pattern,
                }));
            }
        }

        if let Some(id) = authority_id {
            let id = id.trim();
            if id.len() >= 3 && id.chars().all(|c| c.is_ascii_digit()) {
                return Ok(Some(CodeMatch {
                    code: id.to_string(),
                    confidence: 0.5,
                    tier: MatchTier::IdPassthrough,
                }));
            }
        }

        db.record_unmatched_authority(&query, authority_id)?;
        tracing::debug!(authority = %query, "no code resolution; recorded for learning");
        Ok(None)
    }

    /// Best-effort county/city guess for a zip, from co-occurrence counts
    /// over the imported address index. Estimation only; results carry
    /// `Provenance::Estimated`.
    pub fn estimate_jurisdictions(
        &self,
        db: &Db,
        state_code: &str,
        zip: &str,
    ) -> Result<Vec<Jurisdiction>, DbError> {
        let prefix: String = zip.chars().take(3).collect();
        if prefix.len() < 3 {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for column in [ZipStatColumn::County, ZipStatColumn::City] {
            let frequent = db.frequent_taids_for_zip_prefix(state_code, &prefix, column, 1)?;
            if let Some((taid, _count)) = frequent.first() {
                if let Some(j) = db.find_jurisdiction_by_external_id(taid, state_code)? {
                    out.push(Jurisdiction {
                        provenance: Provenance::Estimated,
                        ..j
                    });
                }
            }
        }
        Ok(out)
    }
}

/// Mines name patterns from every active jurisdiction in storage.
pub fn discover_patterns(db: &Db) -> Result<Vec<Pattern>, DbError> {
    let names = db.jurisdiction_names(None)?;

    // Token frequency across all names; frequent tokens become type
    // indicators for their dominant type.
    let mut token_types: HashMap<String, (usize, HashMap<JurisdictionType, usize>)> =
        HashMap::new();
    for (name, jtype) in &names {
        for token in name.to_uppercase().split_whitespace() {
            let token: String = token.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
            if token.len() < 2 || token.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let entry = token_types.entry(token).or_insert_with(|| (0, HashMap::new()));
            entry.0 += 1;
            *entry.1.entry(*jtype).or_insert(0) += 1;
        }
    }

    let mut patterns = Vec::new();
    for (token, (count, by_type)) in &token_types {
        if *count <= TOKEN_SUPPORT_THRESHOLD {
            continue;
        }
        let Some((&dominant, _)) = by_type.iter().max_by_key(|(_, n)| **n) else {
            continue;
        };
        patterns.push(build_pattern(vec![token.clone()], dominant));
    }

    // Structural extractions run over the raw names regardless of token
    // support, so rare counties still produce a usable pattern.
    let county_re = Regex::new(r"(\w+)\s+COUNTY\b").expect("static regex");
    let city_re = Regex::new(r"\bCITY\s+OF\s+(\w+)").expect("static regex");
    let district_re = Regex::new(r"\b(ESD|MUD|PID|WCID)\s*#?\s*(\d+)?\b").expect("static regex");
    let transit_re = Regex::new(r"\b(MTA|ATD|CTD|RTA)\b").expect("static regex");

    for (name, _) in &names {
        let upper = name.to_uppercase();
        if let Some(caps) = county_re.captures(&upper) {
            patterns.push(build_pattern(
                vec![caps[1].to_string(), "COUNTY".to_string()],
                JurisdictionType::County,
            ));
        }
        if let Some(caps) = city_re.captures(&upper) {
            patterns.push(build_pattern(
                vec!["CITY".to_string(), "OF".to_string(), caps[1].to_string()],
                JurisdictionType::City,
            ));
        }
        if let Some(caps) = district_re.captures(&upper) {
            let mut terms = vec![caps[1].to_string()];
            if let Some(num) = caps.get(2) {
                terms.push(num.as_str().to_string());
            }
            patterns.push(build_pattern(terms, JurisdictionType::SpecialDistrict));
        }
        if let Some(caps) = transit_re.captures(&upper) {
            patterns.push(build_pattern(
                vec![caps[1].to_string()],
                JurisdictionType::TransitAuthority,
            ));
        }
    }

    patterns.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    patterns.dedup_by(|a, b| a.terms == b.terms && a.jurisdiction_type == b.jurisdiction_type);
    Ok(patterns)
}

/// Confidence: base 0.5, +0.1 per term capped at +0.3, +0.2 for the
/// well-understood layers (state, county, city).
fn build_pattern(terms: Vec<String>, jurisdiction_type: JurisdictionType) -> Pattern {
    let term_bonus = (0.1 * terms.len() as f64).min(0.3);
    let type_bonus = match jurisdiction_type {
        JurisdictionType::State | JurisdictionType::County | JurisdictionType::City => 0.2,
        _ => 0.0,
    };
    Pattern {
        terms,
        jurisdiction_type,
        confidence: 0.5 + term_bonus + type_bonus,
    }
}

fn pattern_matches(pattern: &Pattern, query: &str) -> bool {
    if pattern.terms.is_empty() {
        return false;
    }
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| t.chars().filter(|c| c.is_ascii_alphanumeric()).collect())
        .collect();
    let matched = pattern
        .terms
        .iter()
        .filter(|term| tokens.contains(term))
        .count();
    matched as f64 / pattern.terms.len() as f64 >= PATTERN_TERM_THRESHOLD
}

/// Partial-name tier: substring containment either way, gated on the
/// length-ratio guard, best candidate picked by Jaro-Winkler similarity.
fn best_partial_match(query: &str, candidates: &[Jurisdiction]) -> Option<CodeMatch> {
    let mut best: Option<(f64, &Jurisdiction)> = None;
    for j in candidates {
        let cand = j.name.to_uppercase();
        if !cand.contains(query) && !query.contains(cand.as_str()) {
            continue;
        }
        if (query.len() as f64) < cand.len() as f64 * PARTIAL_LENGTH_RATIO {
            continue;
        }
        let score = strsim::jaro_winkler(query, &cand);
        if best.map_or(true, |(s, _)| score > s) {
            best = Some((score, j));
        }
    }
    best.map(|(score, j)| CodeMatch {
        code: j.code.clone(),
        confidence: score,
        tier: MatchTier::PartialName,
    })
}

/// Guesses the jurisdiction type implied by an authority name, used when
/// an imported rate row has no stored jurisdiction yet.
pub fn classify_authority_name(name: &str) -> JurisdictionType {
    let upper = name.to_uppercase();
    if upper.contains("COUNTY") {
        JurisdictionType::County
    } else if upper.contains("CITY OF") || upper.starts_with("CITY ") {
        JurisdictionType::City
    } else if ["MTA", "ATD", "CTD", "RTA"]
        .iter()
        .any(|t| upper.split_whitespace().any(|w| w == *t))
    {
        JurisdictionType::TransitAuthority
    } else if ["ESD", "MUD", "PID", "WCID", "DISTRICT"]
        .iter()
        .any(|t| upper.split_whitespace().any(|w| w == *t))
    {
        JurisdictionType::SpecialDistrict
    } else {
        JurisdictionType::City
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::jurisdiction::Provenance;

    fn test_db() -> Db {
        let db = Db::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    fn seed(db: &Db, name: &str, jtype: JurisdictionType, external_id: Option<&str>) {
        let j = Jurisdiction {
            id: None,
            code: generate_code(jtype, name),
            name: name.to_string(),
            jurisdiction_type: jtype,
            state_code: "TX".into(),
            priority: jtype.priority(),
            external_id: external_id.map(String::from),
            provenance: Provenance::Index,
        };
        db.upsert_jurisdiction(&j).unwrap();
    }

    fn seed_texas(db: &Db) {
        seed(db, "Texas", JurisdictionType::State, Some("1"));
        seed(db, "Harris County", JurisdictionType::County, Some("101000"));
        seed(db, "Travis County", JurisdictionType::County, Some("227000"));
        seed(db, "Bexar County", JurisdictionType::County, Some("15000"));
        seed(db, "San Antonio", JurisdictionType::City, Some("2015001"));
        seed(db, "San Antonio MTA", JurisdictionType::TransitAuthority, Some("3015996"));
        seed(db, "Travis Co ESD 4", JurisdictionType::SpecialDistrict, Some("5227634"));
    }

    #[test]
    fn exact_name_match() {
        let db = test_db();
        seed_texas(&db);
        let engine = DiscoveryEngine::new();
        let m = engine
            .find_code(&db, "TX", "san antonio", None)
            .unwrap()
            .unwrap();
        assert_eq!(m.tier, MatchTier::ExactName);
        assert_eq!(m.code, "CITY_SAN_ANTONIO");
    }

    #[test]
    fn short_substring_guard() {
        let db = test_db();
        seed_texas(&db);
        let engine = DiscoveryEngine::new();
        // "ANTON" is a substring of "SAN ANTONIO" but fails the length
        // ratio, and must not resolve to it.
        let m = engine.find_code(&db, "TX", "ANTON", None).unwrap();
        assert!(
            m.as_ref().map_or(true, |m| m.code != "CITY_SAN_ANTONIO"),
            "short substring resolved to SAN ANTONIO: {:?}",
            m
        );
    }

    #[test]
    fn full_name_with_qualifier_matches() {
        let db = test_db();
        seed_texas(&db);
        let engine = DiscoveryEngine::new();
        let m = engine
            .find_code(&db, "TX", "SAN ANTONIO MTA", None)
            .unwrap()
            .unwrap();
        assert_eq!(m.code, "TRANSIT_AUTHORITY_SAN_ANTONIO_MTA");
    }

    #[test]
    fn pattern_tier_generates_code() {
        let db = test_db();
        seed_texas(&db);
        let engine = DiscoveryEngine::new();
        // "Comal County" is not stored; the mined "<name> COUNTY"
        // structure still classifies it.
        let m = engine
            .find_code(&db, "TX", "COMAL COUNTY", None)
            .unwrap()
            .unwrap();
        assert_eq!(m.tier, MatchTier::Pattern);
        assert_eq!(m.code, "COUNTY_COMAL_COUNTY");
    }

    #[test]
    fn numeric_id_passthrough() {
        let db = test_db();
        let engine = DiscoveryEngine::new();
        let m = engine
            .find_code(&db, "TX", "UNKNOWN AUTHORITY ZZZ", Some("4227999"))
            .unwrap()
            .unwrap();
        assert_eq!(m.tier, MatchTier::IdPassthrough);
        assert_eq!(m.code, "4227999");

        // Too-short ids do not pass through.
        let none = engine
            .find_code(&db, "TX", "UNKNOWN AUTHORITY ZZZ", Some("42"))
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn unmatched_is_recorded() {
        let db = test_db();
        let engine = DiscoveryEngine::new();
        assert!(engine
            .find_code(&db, "TX", "TOTALLY NOVEL THING", None)
            .unwrap()
            .is_none());
        let n: i64 = db
            .conn()
            .query_row("SELECT COUNT(1) FROM discovery_unmatched", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn confidence_scoring() {
        let p1 = build_pattern(vec!["COUNTY".into()], JurisdictionType::County);
        assert!((p1.confidence - 0.8).abs() < 1e-9); // 0.5 + 0.1 + 0.2

        let p2 = build_pattern(
            vec!["A".into(), "B".into(), "C".into(), "D".into(), "E".into()],
            JurisdictionType::SpecialDistrict,
        );
        assert!((p2.confidence - 0.8).abs() < 1e-9); // 0.5 + capped 0.3
    }

    #[test]
    fn pattern_cache_populates_and_invalidates() {
        let db = test_db();
        seed_texas(&db);
        let engine = DiscoveryEngine::new();
        let before = engine.patterns(&db).unwrap().len();
        assert!(before > 0);

        seed(&db, "Dallas MTA", JurisdictionType::TransitAuthority, None);
        // Cached set unchanged until invalidated.
        assert_eq!(engine.patterns(&db).unwrap().len(), before);
        engine.invalidate();
        assert!(engine.patterns(&db).unwrap().len() >= before);
    }

    #[test]
    fn classify_names() {
        assert_eq!(classify_authority_name("Comal County"), JurisdictionType::County);
        assert_eq!(classify_authority_name("City of Houston"), JurisdictionType::City);
        assert_eq!(
            classify_authority_name("Austin MTA"),
            JurisdictionType::TransitAuthority
        );
        assert_eq!(
            classify_authority_name("Harris Co MUD 400"),
            JurisdictionType::SpecialDistrict
        );
    }
}
