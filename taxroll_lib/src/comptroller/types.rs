//! File formats published by the comptroller's data service.
//!
//! These are versioned external schemas outside our control: a width or
//! column-count mismatch is a [`ComptrollerError::Schema`] at ingest time.

use serde::Deserialize;

use super::error::ComptrollerError;
use crate::address::Parity;

/// One entry of the file-listing endpoint.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FileEntry {
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "fileSize", default)]
    pub file_size: Option<i64>,
    #[serde(rename = "postedDate", default)]
    pub posted_date: Option<String>,
}

/// One row of the quarterly rates file: authority name, TAID, rate.
#[derive(Debug, Clone, PartialEq)]
pub struct RateRecord {
    pub authority_name: String,
    /// Texas Authority ID, opaque outside ingestion.
    pub authority_id: String,
    /// Percentage form (the file carries decimal fractions).
    pub rate: f64,
}

/// Parses the rates CSV. The file carries a header row and rates as
/// decimal fractions ("0.012500"), converted to percentages here.
pub fn parse_rates_csv(bytes: &[u8]) -> Result<Vec<RateRecord>, ComptrollerError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(false)
        .from_reader(bytes);

    let mut records = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let row = result.map_err(|e| ComptrollerError::Schema(format!("line {}: {}", line + 2, e)))?;
        if row.len() < 3 {
            return Err(ComptrollerError::Schema(format!(
                "line {}: expected 3 columns, got {}",
                line + 2,
                row.len()
            )));
        }
        let rate: f64 = row[2]
            .parse()
            .map_err(|_| ComptrollerError::Schema(format!("line {}: bad rate '{}'", line + 2, &row[2])))?;
        records.push(RateRecord {
            authority_name: row[0].to_uppercase(),
            authority_id: row[1].to_string(),
            rate: rate * 100.0,
        });
    }
    Ok(records)
}

/// One fixed-width address-range record.
///
/// The published layout carries 27+ fields; the slots below are the ones
/// the index consumes. Trailing descriptive fields (authority names,
/// county name, effective period) are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressRecord {
    pub county_code: String,
    pub address_from: i64,
    pub address_to: i64,
    pub parity: Parity,
    pub pre_direction: Option<String>,
    pub street_name: String,
    pub suffix: Option<String>,
    pub post_direction: Option<String>,
    pub zip_code: String,
    pub zip_plus4: Option<String>,
    pub state_taid: Option<String>,
    pub county_taid: Option<String>,
    pub city_taid: Option<String>,
    pub transit_taid: Option<String>,
    pub district_taid: Option<String>,
    pub extra_taids: Vec<String>,
}

// Fixed-width slots: (start, len).
const COUNTY_CODE: (usize, usize) = (0, 3);
const ADDRESS_FROM: (usize, usize) = (3, 10);
const ADDRESS_TO: (usize, usize) = (13, 10);
const PARITY: (usize, usize) = (23, 1);
const PRE_DIRECTION: (usize, usize) = (24, 2);
const STREET_NAME: (usize, usize) = (26, 30);
const SUFFIX: (usize, usize) = (56, 5);
const POST_DIRECTION: (usize, usize) = (61, 2);
const ZIP_CODE: (usize, usize) = (63, 5);
const ZIP_PLUS4: (usize, usize) = (68, 4);
const STATE_TAID: (usize, usize) = (72, 10);
const COUNTY_TAID: (usize, usize) = (82, 10);
const CITY_TAID: (usize, usize) = (92, 10);
const TRANSIT_TAID: (usize, usize) = (102, 10);
const DISTRICT_TAID: (usize, usize) = (112, 10);
const EXTRA_TAIDS: [(usize, usize); 3] = [(122, 10), (132, 10), (142, 10)];

/// Minimum record width covering every consumed slot.
pub const MIN_RECORD_WIDTH: usize = 152;

fn slot(line: &str, (start, len): (usize, usize)) -> String {
    line.get(start..start + len).unwrap_or("").trim().to_string()
}

fn opt_slot(line: &str, pos: (usize, usize)) -> Option<String> {
    let value = slot(line, pos);
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Parses one address-range file into records, skipping blank lines.
pub fn parse_address_file(text: &str) -> Result<Vec<AddressRecord>, ComptrollerError> {
    let mut records = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if line.len() < MIN_RECORD_WIDTH {
            return Err(ComptrollerError::Schema(format!(
                "line {}: record width {} below {}",
                i + 1,
                line.len(),
                MIN_RECORD_WIDTH
            )));
        }

        let address_from: i64 = slot(line, ADDRESS_FROM).parse().map_err(|_| {
            ComptrollerError::Schema(format!("line {}: bad address_from", i + 1))
        })?;
        let address_to: i64 = slot(line, ADDRESS_TO).parse().map_err(|_| {
            ComptrollerError::Schema(format!("line {}: bad address_to", i + 1))
        })?;
        if address_from > address_to {
            return Err(ComptrollerError::Schema(format!(
                "line {}: inverted address range",
                i + 1
            )));
        }

        records.push(AddressRecord {
            county_code: slot(line, COUNTY_CODE),
            address_from,
            address_to,
            parity: Parity::parse(&slot(line, PARITY)),
            pre_direction: opt_slot(line, PRE_DIRECTION),
            street_name: slot(line, STREET_NAME).to_uppercase(),
            suffix: opt_slot(line, SUFFIX),
            post_direction: opt_slot(line, POST_DIRECTION),
            zip_code: slot(line, ZIP_CODE),
            zip_plus4: opt_slot(line, ZIP_PLUS4),
            state_taid: opt_slot(line, STATE_TAID),
            county_taid: opt_slot(line, COUNTY_TAID),
            city_taid: opt_slot(line, CITY_TAID),
            transit_taid: opt_slot(line, TRANSIT_TAID),
            district_taid: opt_slot(line, DISTRICT_TAID),
            extra_taids: EXTRA_TAIDS
                .iter()
                .filter_map(|pos| opt_slot(line, *pos))
                .collect(),
        });
    }
    Ok(records)
}

#[cfg(test)]
pub(crate) fn build_fixed_line(record: &AddressRecord) -> String {
    let mut line = vec![b' '; MIN_RECORD_WIDTH];
    let mut put = |(start, len): (usize, usize), value: &str| {
        for (i, b) in value.bytes().take(len).enumerate() {
            line[start + i] = b;
        }
    };
    put(COUNTY_CODE, &record.county_code);
    put(ADDRESS_FROM, &record.address_from.to_string());
    put(ADDRESS_TO, &record.address_to.to_string());
    put(
        PARITY,
        match record.parity {
            Parity::Even => "E",
            Parity::Odd => "O",
            Parity::Both => "B",
        },
    );
    if let Some(ref v) = record.pre_direction {
        put(PRE_DIRECTION, v);
    }
    put(STREET_NAME, &record.street_name);
    if let Some(ref v) = record.suffix {
        put(SUFFIX, v);
    }
    if let Some(ref v) = record.post_direction {
        put(POST_DIRECTION, v);
    }
    put(ZIP_CODE, &record.zip_code);
    if let Some(ref v) = record.zip_plus4 {
        put(ZIP_PLUS4, v);
    }
    if let Some(ref v) = record.state_taid {
        put(STATE_TAID, v);
    }
    if let Some(ref v) = record.county_taid {
        put(COUNTY_TAID, v);
    }
    if let Some(ref v) = record.city_taid {
        put(CITY_TAID, v);
    }
    if let Some(ref v) = record.transit_taid {
        put(TRANSIT_TAID, v);
    }
    if let Some(ref v) = record.district_taid {
        put(DISTRICT_TAID, v);
    }
    for (slot_pos, value) in EXTRA_TAIDS.iter().zip(record.extra_taids.iter()) {
        put(*slot_pos, value);
    }
    String::from_utf8(line).expect("ascii record")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> AddressRecord {
        AddressRecord {
            county_code: "227".into(),
            address_from: 1000,
            address_to: 1198,
            parity: Parity::Even,
            pre_direction: None,
            street_name: "CONGRESS".into(),
            suffix: Some("AVE".into()),
            post_direction: None,
            zip_code: "78701".into(),
            zip_plus4: None,
            state_taid: Some("1".into()),
            county_taid: Some("227000".into()),
            city_taid: Some("2227001".into()),
            transit_taid: Some("3227999".into()),
            district_taid: None,
            extra_taids: vec!["5227634".into()],
        }
    }

    #[test]
    fn fixed_width_round_trip() {
        let line = build_fixed_line(&sample_record());
        let parsed = parse_address_file(&line).unwrap();
        assert_eq!(parsed, vec![sample_record()]);
    }

    #[test]
    fn short_record_is_schema_error() {
        let err = parse_address_file("227 1000").unwrap_err();
        assert!(matches!(err, ComptrollerError::Schema(_)));
    }

    #[test]
    fn inverted_range_is_schema_error() {
        let mut record = sample_record();
        record.address_from = 2000;
        record.address_to = 1000;
        let line = build_fixed_line(&record);
        assert!(matches!(
            parse_address_file(&line),
            Err(ComptrollerError::Schema(_))
        ));
    }

    #[test]
    fn blank_lines_skipped() {
        let line = build_fixed_line(&sample_record());
        let text = format!("\n{}\n\n", line);
        assert_eq!(parse_address_file(&text).unwrap().len(), 1);
    }

    #[test]
    fn rates_csv_converts_fractions() {
        let csv = "name,taid,rate\nTEXAS STATE,1,0.0625\nSAN ANTONIO MTA,3015996,0.005000\n";
        let records = parse_rates_csv(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].authority_name, "TEXAS STATE");
        assert!((records[0].rate - 6.25).abs() < 1e-9);
        assert!((records[1].rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn rates_csv_bad_rate_is_schema_error() {
        let csv = "name,taid,rate\nTEXAS STATE,1,abc\n";
        assert!(matches!(
            parse_rates_csv(csv.as_bytes()),
            Err(ComptrollerError::Schema(_))
        ));
    }

    #[test]
    fn rates_csv_short_row_is_schema_error() {
        let csv = "name,taid,rate\nTEXAS STATE,1,0.0625\nONLY,TWO\n";
        assert!(parse_rates_csv(csv.as_bytes()).is_err());
    }
}
