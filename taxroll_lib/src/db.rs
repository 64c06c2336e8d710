//! SQLite storage for jurisdictions, address ranges, rates, exemptions,
//! the durable query cache, and the audit trail.

use std::path::Path;

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::address::Parity;
use crate::jurisdiction::{Jurisdiction, JurisdictionType, Provenance};

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("date parse error: {0}")]
    Date(#[from] chrono::ParseError),
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

pub struct Db {
    conn: Connection,
}

/// One row of the address-to-jurisdiction index.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressRangeRow {
    pub range_id: i64,
    pub state_code: String,
    pub county_code: Option<String>,
    pub address_from: i64,
    pub address_to: i64,
    pub address_parity: Parity,
    pub street_pre_direction: Option<String>,
    pub street_name: String,
    pub street_suffix: Option<String>,
    pub street_post_direction: Option<String>,
    pub zip_code: String,
    pub zip_plus4: Option<String>,
    pub state_taid: Option<String>,
    pub county_taid: Option<String>,
    pub city_taid: Option<String>,
    pub transit_taid: Option<String>,
    pub district_taid: Option<String>,
    /// Comma-packed additional authority ids.
    pub extra_taids: Option<String>,
    pub source: String,
}

impl AddressRangeRow {
    /// All authority ids carried by this row, layer slots first.
    pub fn all_taids(&self) -> Vec<String> {
        let mut ids: Vec<String> = [
            &self.state_taid,
            &self.county_taid,
            &self.city_taid,
            &self.transit_taid,
            &self.district_taid,
        ]
        .iter()
        .filter_map(|t| t.as_ref().cloned())
        .collect();
        if let Some(extra) = &self.extra_taids {
            ids.extend(
                extra
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            );
        }
        ids
    }
}

/// A stored tax rate row, versioned by `effective_date` and `is_active`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxRateRow {
    pub rate_id: i64,
    pub jurisdiction_id: i64,
    /// Comma list of canonical service types, or `*` for all.
    pub service_types: String,
    pub tax_type: String,
    pub rate_type: String,
    pub percentage_rate: Option<f64>,
    pub fixed_amount: Option<f64>,
    pub tier_structure: Option<String>,
    pub is_recoverable: bool,
    pub effective_date: NaiveDate,
    pub external_id: Option<String>,
    pub source: String,
    pub priority: i64,
}

impl TaxRateRow {
    /// Whether this rate covers the given canonical service type.
    pub fn covers_service(&self, service_type: &str) -> bool {
        self.service_types == "*"
            || self
                .service_types
                .split(',')
                .any(|s| s.trim() == service_type)
    }
}

/// A customer exemption consumed read-only at calculation time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExemptionRow {
    pub exemption_id: i64,
    pub client_id: String,
    pub exemption_type: String,
    pub exemption_percentage: f64,
    pub certificate_ref: Option<String>,
}

/// A cached provider response (or cached failure).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRow {
    pub status: String,
    pub payload: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub ttl_days: i64,
}

/// One immutable audit record.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CalculationRecord {
    pub calculation_id: i64,
    pub tenant: String,
    pub subject_ref: Option<String>,
    pub calculation_type: String,
    pub engine: String,
    pub input_params: serde_json::Value,
    pub breakdown: serde_json::Value,
    pub jurisdictions: serde_json::Value,
    pub total_tax: f64,
    pub effective_rate: f64,
    pub created_at: String,
}

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection (for internal use by the discovery engine and tests).
    #[doc(hidden)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn init(&self) -> Result<(), DbError> {
        // Check schema version before applying DDL so migrations can add
        // columns that new indexes reference.
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.migrate_v1()?;
            self.conn.pragma_update(None, "user_version", 1)?;
        }

        let schema = include_str!("../../schema/sqlite.sql");
        self.conn.execute_batch(schema)?;

        Ok(())
    }

    fn migrate_v1(&self) -> Result<(), DbError> {
        // Databases created before reconciliation support lack the
        // deactivation column.
        for sql in &[
            "ALTER TABLE jurisdictions ADD COLUMN deactivated_at TEXT",
            "ALTER TABLE tax_rates ADD COLUMN priority INTEGER NOT NULL DEFAULT 0",
        ] {
            match self.conn.execute(sql, []) {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(_, Some(ref msg)))
                    if msg.contains("duplicate column name")
                        || msg.contains("no such table") => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    // ---- jurisdictions ----

    /// Inserts or updates a jurisdiction by `(code, state_code)`, returning
    /// its rowid. Name, metadata, and external id are refreshed; the row is
    /// reactivated if it had been soft-expired.
    pub fn upsert_jurisdiction(&self, j: &Jurisdiction) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO jurisdictions (code, name, jurisdiction_type, state_code, priority, external_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(code, state_code) DO UPDATE SET
               name = excluded.name,
               external_id = COALESCE(excluded.external_id, jurisdictions.external_id),
               deactivated_at = NULL",
            params![
                j.code,
                j.name,
                j.jurisdiction_type.as_str(),
                j.state_code,
                j.priority,
                j.external_id,
            ],
        )?;
        let id: i64 = self.conn.query_row(
            "SELECT jurisdiction_id FROM jurisdictions WHERE code = ?1 AND state_code = ?2",
            params![j.code, j.state_code],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Soft-expires a jurisdiction; rows are never deleted.
    pub fn deactivate_jurisdiction(&self, code: &str, state_code: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE jurisdictions SET deactivated_at = ?3
             WHERE code = ?1 AND state_code = ?2 AND deactivated_at IS NULL",
            params![code, state_code, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_jurisdiction(
        &self,
        code: &str,
        state_code: &str,
    ) -> Result<Option<Jurisdiction>, DbError> {
        self.conn
            .query_row(
                "SELECT jurisdiction_id, code, name, jurisdiction_type, state_code, priority, external_id
                 FROM jurisdictions
                 WHERE code = ?1 AND state_code = ?2 AND deactivated_at IS NULL",
                params![code, state_code],
                row_to_jurisdiction,
            )
            .optional()
            .map_err(DbError::from)
    }

    pub fn get_jurisdiction_by_id(&self, id: i64) -> Result<Option<Jurisdiction>, DbError> {
        self.conn
            .query_row(
                "SELECT jurisdiction_id, code, name, jurisdiction_type, state_code, priority, external_id
                 FROM jurisdictions WHERE jurisdiction_id = ?1",
                params![id],
                row_to_jurisdiction,
            )
            .optional()
            .map_err(DbError::from)
    }

    pub fn get_jurisdictions_by_ids(&self, ids: &[i64]) -> Result<Vec<Jurisdiction>, DbError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(j) = self.get_jurisdiction_by_id(*id)? {
                out.push(j);
            }
        }
        Ok(out)
    }

    pub fn find_jurisdiction_by_external_id(
        &self,
        external_id: &str,
        state_code: &str,
    ) -> Result<Option<Jurisdiction>, DbError> {
        self.conn
            .query_row(
                "SELECT jurisdiction_id, code, name, jurisdiction_type, state_code, priority, external_id
                 FROM jurisdictions
                 WHERE external_id = ?1 AND state_code = ?2 AND deactivated_at IS NULL",
                params![external_id, state_code],
                row_to_jurisdiction,
            )
            .optional()
            .map_err(DbError::from)
    }

    /// The state-level jurisdiction for a state code, if imported.
    pub fn state_jurisdiction(&self, state_code: &str) -> Result<Option<Jurisdiction>, DbError> {
        self.conn
            .query_row(
                "SELECT jurisdiction_id, code, name, jurisdiction_type, state_code, priority, external_id
                 FROM jurisdictions
                 WHERE state_code = ?1 AND jurisdiction_type = 'state' AND deactivated_at IS NULL",
                params![state_code],
                row_to_jurisdiction,
            )
            .optional()
            .map_err(DbError::from)
    }

    /// Lists active jurisdictions for a state, optionally filtered by type.
    pub fn query_jurisdictions(
        &self,
        state_code: &str,
        jurisdiction_type: Option<JurisdictionType>,
    ) -> Result<Vec<Jurisdiction>, DbError> {
        let mut sql = String::from(
            "SELECT jurisdiction_id, code, name, jurisdiction_type, state_code, priority, external_id
             FROM jurisdictions WHERE state_code = ?1 AND deactivated_at IS NULL",
        );
        if jurisdiction_type.is_some() {
            sql.push_str(" AND jurisdiction_type = ?2");
        }
        sql.push_str(" ORDER BY priority, name");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match jurisdiction_type {
            Some(t) => stmt.query_map(params![state_code, t.as_str()], row_to_jurisdiction)?,
            None => stmt.query_map(params![state_code], row_to_jurisdiction)?,
        };
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// All active (name, type) pairs in a state, for pattern discovery.
    pub fn jurisdiction_names(
        &self,
        state_code: Option<&str>,
    ) -> Result<Vec<(String, JurisdictionType)>, DbError> {
        let mut sql = String::from(
            "SELECT name, jurisdiction_type FROM jurisdictions WHERE deactivated_at IS NULL",
        );
        if state_code.is_some() {
            sql.push_str(" AND state_code = ?1");
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String)> {
            Ok((row.get(0)?, row.get(1)?))
        };
        let rows = match state_code {
            Some(s) => stmt.query_map(params![s], map_row)?,
            None => stmt.query_map([], map_row)?,
        };
        let mut out = Vec::new();
        for row in rows {
            let (name, type_str) = row?;
            if let Some(t) = JurisdictionType::parse(&type_str) {
                out.push((name, t));
            }
        }
        Ok(out)
    }

    /// All active jurisdictions in a state with their external ids, for
    /// discovery code resolution.
    pub fn jurisdictions_for_matching(
        &self,
        state_code: &str,
    ) -> Result<Vec<Jurisdiction>, DbError> {
        self.query_jurisdictions(state_code, None)
    }

    // ---- address ranges ----

    /// Replaces one (state, county, source) partition of the index inside a
    /// single transaction. Cross-row FK checks are deferred for throughput
    /// and re-checked at commit.
    pub fn replace_address_ranges(
        &mut self,
        state_code: &str,
        county_code: Option<&str>,
        source: &str,
        rows: &[AddressRangeRow],
    ) -> Result<usize, DbError> {
        let tx = self.conn.transaction()?;
        tx.execute_batch("PRAGMA defer_foreign_keys = ON;")?;

        match county_code {
            Some(county) => tx.execute(
                "DELETE FROM address_ranges
                 WHERE state_code = ?1 AND county_code = ?2 AND source = ?3",
                params![state_code, county, source],
            )?,
            None => tx.execute(
                "DELETE FROM address_ranges
                 WHERE state_code = ?1 AND county_code IS NULL AND source = ?2",
                params![state_code, source],
            )?,
        };

        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO address_ranges (
                   state_code, county_code, address_from, address_to, address_parity,
                   street_pre_direction, street_name, street_suffix, street_post_direction,
                   zip_code, zip_plus4,
                   state_taid, county_taid, city_taid, transit_taid, district_taid,
                   extra_taids, source
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.state_code,
                    row.county_code,
                    row.address_from,
                    row.address_to,
                    row.address_parity.as_str(),
                    row.street_pre_direction,
                    row.street_name,
                    row.street_suffix,
                    row.street_post_direction,
                    row.zip_code,
                    row.zip_plus4,
                    row.state_taid,
                    row.county_taid,
                    row.city_taid,
                    row.transit_taid,
                    row.district_taid,
                    row.extra_taids,
                    row.source,
                ])?;
                inserted += 1;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Appends rows to the current generation of the index, for follow-up
    /// batches after [`Db::replace_address_ranges`] opened a partition.
    pub fn append_address_ranges(&mut self, rows: &[AddressRangeRow]) -> Result<usize, DbError> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO address_ranges (
                   state_code, county_code, address_from, address_to, address_parity,
                   street_pre_direction, street_name, street_suffix, street_post_direction,
                   zip_code, zip_plus4,
                   state_taid, county_taid, city_taid, transit_taid, district_taid,
                   extra_taids, source
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.state_code,
                    row.county_code,
                    row.address_from,
                    row.address_to,
                    row.address_parity.as_str(),
                    row.street_pre_direction,
                    row.street_name,
                    row.street_suffix,
                    row.street_post_direction,
                    row.zip_code,
                    row.zip_plus4,
                    row.state_taid,
                    row.county_taid,
                    row.city_taid,
                    row.transit_taid,
                    row.district_taid,
                    row.extra_taids,
                    row.source,
                ])?;
                inserted += 1;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Looks up the address-range row covering a parsed street address.
    ///
    /// Parity and number-range filtering happen in SQL; the tie-break when
    /// several rows match is the narrowest range, then lowest rowid.
    pub fn lookup_address_range(
        &self,
        state_code: &str,
        zip_code: &str,
        street_names: &[String],
        street_number: i64,
        street_suffix: Option<&str>,
    ) -> Result<Option<AddressRangeRow>, DbError> {
        let parity_col = if street_number % 2 == 0 { "even" } else { "odd" };

        for name in street_names {
            let mut stmt = self.conn.prepare(
                "SELECT range_id, state_code, county_code, address_from, address_to,
                        address_parity, street_pre_direction, street_name, street_suffix,
                        street_post_direction, zip_code, zip_plus4,
                        state_taid, county_taid, city_taid, transit_taid, district_taid,
                        extra_taids, source
                 FROM address_ranges
                 WHERE state_code = ?1 AND zip_code = ?2 AND street_name = ?3
                   AND address_from <= ?4 AND address_to >= ?4
                   AND (address_parity = 'both' OR address_parity = ?5)
                   AND (street_suffix IS NULL OR ?6 IS NULL OR street_suffix = ?6)
                 ORDER BY (address_to - address_from) ASC, range_id ASC
                 LIMIT 1",
            )?;
            let row = stmt
                .query_row(
                    params![state_code, zip_code, name, street_number, parity_col, street_suffix],
                    row_to_address_range,
                )
                .optional()?;
            if row.is_some() {
                return Ok(row);
            }
        }
        Ok(None)
    }

    /// Most frequent authority ids for a zip prefix, mined from the index.
    /// Used by the estimation fallback, never as an exact answer.
    pub fn frequent_taids_for_zip_prefix(
        &self,
        state_code: &str,
        zip_prefix: &str,
        column: ZipStatColumn,
        limit: usize,
    ) -> Result<Vec<(String, i64)>, DbError> {
        let col = column.column_name();
        let sql = format!(
            "SELECT {col}, COUNT(1) AS n FROM address_ranges
             WHERE state_code = ?1 AND zip_code LIKE ?2 AND {col} IS NOT NULL
             GROUP BY {col} ORDER BY n DESC LIMIT ?3"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![state_code, format!("{}%", zip_prefix), limit as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ---- tax rates (versioned) ----

    /// Inserts a new generation of rates for a jurisdiction. Prior active
    /// rows for the same (tax_type, source) are flipped inactive, never
    /// deleted, so concurrent readers keep a consistent view.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_rate_version(
        &self,
        jurisdiction_id: i64,
        service_types: &str,
        tax_type: &str,
        rate_type: &str,
        percentage_rate: Option<f64>,
        fixed_amount: Option<f64>,
        tier_structure: Option<&str>,
        effective_date: NaiveDate,
        external_id: Option<&str>,
        source: &str,
    ) -> Result<i64, DbError> {
        self.conn.execute(
            "UPDATE tax_rates SET is_active = 0
             WHERE jurisdiction_id = ?1 AND tax_type = ?2 AND source = ?3 AND is_active = 1",
            params![jurisdiction_id, tax_type, source],
        )?;
        self.conn.execute(
            "INSERT INTO tax_rates (
               jurisdiction_id, service_types, tax_type, rate_type,
               percentage_rate, fixed_amount, tier_structure,
               is_active, effective_date, external_id, source
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9, ?10)",
            params![
                jurisdiction_id,
                service_types,
                tax_type,
                rate_type,
                percentage_rate,
                fixed_amount,
                tier_structure,
                effective_date.format("%Y-%m-%d").to_string(),
                external_id,
                source,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Active rates for a jurisdiction effective on or before `as_of`.
    /// Service-type coverage is filtered by the caller via
    /// [`TaxRateRow::covers_service`] (comma-list semantics).
    pub fn rates_for_jurisdiction(
        &self,
        jurisdiction_id: i64,
        as_of: NaiveDate,
    ) -> Result<Vec<TaxRateRow>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT rate_id, jurisdiction_id, service_types, tax_type, rate_type,
                    percentage_rate, fixed_amount, tier_structure, is_recoverable,
                    effective_date, external_id, source, priority
             FROM tax_rates
             WHERE jurisdiction_id = ?1 AND is_active = 1 AND effective_date <= ?2
             ORDER BY priority DESC, effective_date DESC",
        )?;
        let rows = stmt.query_map(
            params![jurisdiction_id, as_of.format("%Y-%m-%d").to_string()],
            row_to_tax_rate,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ---- exemptions ----

    /// Active exemptions for a client whose validity window covers `as_of`.
    pub fn active_exemptions(
        &self,
        client_id: &str,
        as_of: NaiveDate,
    ) -> Result<Vec<ExemptionRow>, DbError> {
        let day = as_of.format("%Y-%m-%d").to_string();
        let mut stmt = self.conn.prepare(
            "SELECT exemption_id, client_id, exemption_type, exemption_percentage, certificate_ref
             FROM tax_exemptions
             WHERE client_id = ?1 AND status = 'active'
               AND (valid_from IS NULL OR valid_from <= ?2)
               AND (valid_until IS NULL OR valid_until >= ?2)",
        )?;
        let rows = stmt.query_map(params![client_id, day], |row| {
            Ok(ExemptionRow {
                exemption_id: row.get(0)?,
                client_id: row.get(1)?,
                exemption_type: row.get(2)?,
                exemption_percentage: row.get(3)?,
                certificate_ref: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Test/seed helper: registers an exemption.
    pub fn insert_exemption(
        &self,
        client_id: &str,
        exemption_type: &str,
        percentage: f64,
        certificate_ref: Option<&str>,
    ) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO tax_exemptions (client_id, exemption_type, exemption_percentage, status, certificate_ref)
             VALUES (?1, ?2, ?3, 'active', ?4)",
            params![client_id, exemption_type, percentage, certificate_ref],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    // ---- query cache ----

    pub fn cache_get(&self, cache_key: &str) -> Result<Option<CacheRow>, DbError> {
        self.conn
            .query_row(
                "SELECT status, payload, error_message, created_at, ttl_days
                 FROM query_cache WHERE cache_key = ?1",
                params![cache_key],
                |row| {
                    Ok(CacheRow {
                        status: row.get(0)?,
                        payload: row.get(1)?,
                        error_message: row.get(2)?,
                        created_at: row.get(3)?,
                        ttl_days: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(DbError::from)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn cache_put(
        &self,
        cache_key: &str,
        tenant: &str,
        provider: &str,
        query_type: &str,
        status: &str,
        payload: Option<&str>,
        error_message: Option<&str>,
        response_time_ms: Option<i64>,
        created_at: &str,
        ttl_days: i64,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO query_cache (
               cache_key, tenant, provider, query_type, status,
               payload, error_message, response_time_ms, created_at, ttl_days
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(cache_key) DO UPDATE SET
               status = excluded.status,
               payload = excluded.payload,
               error_message = excluded.error_message,
               response_time_ms = excluded.response_time_ms,
               created_at = excluded.created_at,
               ttl_days = excluded.ttl_days",
            params![
                cache_key,
                tenant,
                provider,
                query_type,
                status,
                payload,
                error_message,
                response_time_ms,
                created_at,
                ttl_days,
            ],
        )?;
        Ok(())
    }

    /// Deletes entries past their TTL. Expiry is otherwise lazy (expired
    /// rows are treated as misses, not removed on read).
    pub fn cache_sweep(&self, now: chrono::DateTime<Utc>) -> Result<usize, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT cache_key, created_at, ttl_days FROM query_cache")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut expired = Vec::new();
        for row in rows {
            let (key, created_at, ttl_days) = row?;
            let created = chrono::DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc);
            if now - created >= chrono::Duration::days(ttl_days) {
                expired.push(key);
            }
        }
        let count = expired.len();
        for key in expired {
            self.conn
                .execute("DELETE FROM query_cache WHERE cache_key = ?1", params![key])?;
        }
        Ok(count)
    }

    // ---- audit trail ----

    #[allow(clippy::too_many_arguments)]
    pub fn insert_calculation(
        &self,
        tenant: &str,
        subject_ref: Option<&str>,
        calculation_type: &str,
        engine: &str,
        input_params: &serde_json::Value,
        breakdown: &serde_json::Value,
        jurisdictions: &serde_json::Value,
        total_tax: f64,
        effective_rate: f64,
    ) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO tax_calculations (
               tenant, subject_ref, calculation_type, engine,
               input_params, breakdown, jurisdictions,
               total_tax, effective_rate, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                tenant,
                subject_ref,
                calculation_type,
                engine,
                serde_json::to_string(input_params)?,
                serde_json::to_string(breakdown)?,
                serde_json::to_string(jurisdictions)?,
                total_tax,
                effective_rate,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn query_calculations(
        &self,
        tenant: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<CalculationRecord>, DbError> {
        let from = from
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "0000-01-01".to_string());
        let to = to
            .map(|d| format!("{}T23:59:59Z", d.format("%Y-%m-%d")))
            .unwrap_or_else(|| "9999-12-31".to_string());
        let mut stmt = self.conn.prepare(
            "SELECT calculation_id, tenant, subject_ref, calculation_type, engine,
                    input_params, breakdown, jurisdictions, total_tax, effective_rate, created_at
             FROM tax_calculations
             WHERE tenant = ?1 AND created_at >= ?2 AND created_at <= ?3
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![tenant, from, to], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, f64>(8)?,
                row.get::<_, f64>(9)?,
                row.get::<_, String>(10)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (
                calculation_id,
                tenant,
                subject_ref,
                calculation_type,
                engine,
                input_params,
                breakdown,
                jurisdictions,
                total_tax,
                effective_rate,
                created_at,
            ) = row?;
            out.push(CalculationRecord {
                calculation_id,
                tenant,
                subject_ref,
                calculation_type,
                engine,
                input_params: serde_json::from_str(&input_params)?,
                breakdown: serde_json::from_str(&breakdown)?,
                jurisdictions: serde_json::from_str(&jurisdictions)?,
                total_tax,
                effective_rate,
                created_at,
            });
        }
        Ok(out)
    }

    // ---- discovery support ----

    /// Records an authority the discovery engine could not resolve, for
    /// future pattern learning.
    pub fn record_unmatched_authority(
        &self,
        authority_name: &str,
        authority_id: Option<&str>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO discovery_unmatched (authority_name, authority_id, first_seen)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(authority_name, authority_id) DO UPDATE SET
               seen_count = seen_count + 1",
            params![
                authority_name,
                authority_id.unwrap_or(""),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

/// Column selector for zip-prefix co-occurrence statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZipStatColumn {
    County,
    City,
}

impl ZipStatColumn {
    fn column_name(&self) -> &'static str {
        match self {
            ZipStatColumn::County => "county_taid",
            ZipStatColumn::City => "city_taid",
        }
    }
}

fn row_to_jurisdiction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Jurisdiction> {
    let type_str: String = row.get(3)?;
    let jurisdiction_type = JurisdictionType::parse(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown jurisdiction type {type_str}").into(),
        )
    })?;
    Ok(Jurisdiction {
        id: Some(row.get(0)?),
        code: row.get(1)?,
        name: row.get(2)?,
        jurisdiction_type,
        state_code: row.get(4)?,
        priority: row.get(5)?,
        external_id: row.get(6)?,
        provenance: Provenance::Index,
    })
}

fn row_to_address_range(row: &rusqlite::Row<'_>) -> rusqlite::Result<AddressRangeRow> {
    let parity: String = row.get(5)?;
    Ok(AddressRangeRow {
        range_id: row.get(0)?,
        state_code: row.get(1)?,
        county_code: row.get(2)?,
        address_from: row.get(3)?,
        address_to: row.get(4)?,
        address_parity: Parity::parse(&parity),
        street_pre_direction: row.get(6)?,
        street_name: row.get(7)?,
        street_suffix: row.get(8)?,
        street_post_direction: row.get(9)?,
        zip_code: row.get(10)?,
        zip_plus4: row.get(11)?,
        state_taid: row.get(12)?,
        county_taid: row.get(13)?,
        city_taid: row.get(14)?,
        transit_taid: row.get(15)?,
        district_taid: row.get(16)?,
        extra_taids: row.get(17)?,
        source: row.get(18)?,
    })
}

fn row_to_tax_rate(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaxRateRow> {
    let effective: String = row.get(9)?;
    let effective_date = NaiveDate::parse_from_str(&effective, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(TaxRateRow {
        rate_id: row.get(0)?,
        jurisdiction_id: row.get(1)?,
        service_types: row.get(2)?,
        tax_type: row.get(3)?,
        rate_type: row.get(4)?,
        percentage_rate: row.get(5)?,
        fixed_amount: row.get(6)?,
        tier_structure: row.get(7)?,
        is_recoverable: row.get::<_, i64>(8)? != 0,
        effective_date,
        external_id: row.get(10)?,
        source: row.get(11)?,
        priority: row.get(12)?,
    })
}
