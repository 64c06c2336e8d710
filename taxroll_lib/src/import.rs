//! Bulk ingestion of official rate and address-range data.
//!
//! Address ranges are replaced per (county, source) partition inside one
//! transaction each. Rates are versioned: new generations deactivate the
//! old rows instead of deleting them, so readers mid-import keep a
//! consistent view.

use chrono::NaiveDate;

use crate::calculator::TaxService;
use crate::comptroller::{AddressRecord, RateRecord};
use crate::db::AddressRangeRow;
use crate::discovery::classify_authority_name;
use crate::error::TaxError;
use crate::jurisdiction::{generate_code, Jurisdiction, Provenance};

/// Rows per partition batch for address imports.
const ADDRESS_BATCH_SIZE: usize = 5000;

/// Outcome of a rate-file import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateImportSummary {
    pub rates_imported: usize,
    pub jurisdictions_created: usize,
    pub unresolved: usize,
}

/// Outcome of an address-file import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressImportSummary {
    pub ranges_imported: usize,
    pub counties: usize,
}

impl TaxService {
    /// Imports one quarterly rates file. Authorities are resolved through
    /// the discovery engine; unknown ones get a jurisdiction created with
    /// a generated code and a type classified from the name.
    pub fn import_rate_records(
        &self,
        state_code: &str,
        records: &[RateRecord],
        source: &str,
        effective_date: NaiveDate,
    ) -> Result<RateImportSummary, TaxError> {
        let mut summary = RateImportSummary::default();

        for record in records {
            let existing = self
                .db
                .find_jurisdiction_by_external_id(&record.authority_id, state_code)?;

            let jurisdiction_id = match existing {
                Some(j) => {
                    // Refresh the name; ids are stable across quarters.
                    let refreshed = Jurisdiction {
                        name: record.authority_name.clone(),
                        ..j
                    };
                    self.db.upsert_jurisdiction(&refreshed)?
                }
                None => {
                    let (code, jurisdiction_type) = match self.discovery.find_code(
                        &self.db,
                        state_code,
                        &record.authority_name,
                        Some(&record.authority_id),
                    )? {
                        Some(code_match) => {
                            (code_match.code, classify_authority_name(&record.authority_name))
                        }
                        None => {
                            summary.unresolved += 1;
                            let jurisdiction_type =
                                classify_authority_name(&record.authority_name);
                            (
                                generate_code(jurisdiction_type, &record.authority_name),
                                jurisdiction_type,
                            )
                        }
                    };
                    summary.jurisdictions_created += 1;
                    self.db.upsert_jurisdiction(&Jurisdiction {
                        id: None,
                        code,
                        name: record.authority_name.clone(),
                        jurisdiction_type,
                        state_code: state_code.to_string(),
                        priority: jurisdiction_type.priority(),
                        external_id: Some(record.authority_id.clone()),
                        provenance: Provenance::Index,
                    })?
                }
            };

            self.db.insert_rate_version(
                jurisdiction_id,
                "*",
                "sales",
                "percentage",
                Some(record.rate),
                None,
                None,
                effective_date,
                Some(&record.authority_id),
                source,
            )?;
            summary.rates_imported += 1;
        }

        // New names may shift the mined patterns.
        self.discovery.invalidate();
        tracing::info!(
            state = state_code,
            imported = summary.rates_imported,
            created = summary.jurisdictions_created,
            unresolved = summary.unresolved,
            "rate import complete"
        );
        Ok(summary)
    }

    /// Imports one address-range file, partitioned by county. Each county
    /// partition is replaced in its own transaction, batched for very
    /// large counties.
    pub fn import_address_records(
        &mut self,
        state_code: &str,
        records: &[AddressRecord],
        source: &str,
    ) -> Result<AddressImportSummary, TaxError> {
        let mut summary = AddressImportSummary::default();

        let mut counties: Vec<&str> = records.iter().map(|r| r.county_code.as_str()).collect();
        counties.sort_unstable();
        counties.dedup();

        for county in counties {
            let rows: Vec<AddressRangeRow> = records
                .iter()
                .filter(|r| r.county_code == county)
                .map(|r| to_range_row(state_code, source, r))
                .collect();

            // First batch replaces the partition; follow-up batches append
            // within the same generation.
            for (i, batch) in rows.chunks(ADDRESS_BATCH_SIZE).enumerate() {
                if i == 0 {
                    self.db
                        .replace_address_ranges(state_code, Some(county), source, batch)?;
                } else {
                    self.db.append_address_ranges(batch)?;
                }
                summary.ranges_imported += batch.len();
            }
            summary.counties += 1;
        }

        tracing::info!(
            state = state_code,
            ranges = summary.ranges_imported,
            counties = summary.counties,
            "address import complete"
        );
        Ok(summary)
    }
}

fn to_range_row(state_code: &str, source: &str, record: &AddressRecord) -> AddressRangeRow {
    AddressRangeRow {
        range_id: 0,
        state_code: state_code.to_string(),
        county_code: Some(record.county_code.clone()),
        address_from: record.address_from,
        address_to: record.address_to,
        address_parity: record.parity,
        street_pre_direction: record.pre_direction.clone(),
        street_name: record.street_name.clone(),
        street_suffix: record.suffix.clone(),
        street_post_direction: record.post_direction.clone(),
        zip_code: record.zip_code.clone(),
        zip_plus4: record.zip_plus4.clone(),
        state_taid: record.state_taid.clone(),
        county_taid: record.county_taid.clone(),
        city_taid: record.city_taid.clone(),
        transit_taid: record.transit_taid.clone(),
        district_taid: record.district_taid.clone(),
        extra_taids: if record.extra_taids.is_empty() {
            None
        } else {
            Some(record.extra_taids.join(","))
        },
        source: source.to_string(),
    }
}
