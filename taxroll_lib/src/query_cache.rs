//! Durable provider-response cache on top of the SQLite store.
//!
//! Every external call is preceded by a lookup and followed by a write,
//! including failures: errors and rate-limit denials are cached with short
//! TTLs so repeated attempts short-circuit without touching the network.

use chrono::{DateTime, Duration, Utc};

use crate::db::{Db, DbError};

/// Cache entry status values.
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_RATE_LIMITED: &str = "rate_limited";

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedResult {
    /// A prior successful payload.
    Success(String),
    /// A prior failure; `rate_limited` distinguishes throttling from other
    /// upstream errors.
    Failure {
        message: String,
        rate_limited: bool,
    },
}

/// TTL in days for a (provider, query_type) pair. Failure entries always
/// use [`ERROR_TTL_DAYS`].
pub fn ttl_days(provider: &str, query_type: &str) -> i64 {
    match (provider, query_type) {
        ("geocode", _) => 30,
        ("vat", _) => 7,
        ("salestax", _) => 7,
        ("comptroller", "file_list") => 1,
        _ => 7,
    }
}

/// Short TTL for cached failures (both errors and rate-limit denials).
pub const ERROR_TTL_DAYS: i64 = 1;

/// Tenant-scoped view over the durable query cache.
pub struct QueryCache<'a> {
    db: &'a Db,
    tenant: String,
}

impl<'a> QueryCache<'a> {
    pub fn new(db: &'a Db, tenant: &str) -> Self {
        Self {
            db,
            tenant: tenant.to_string(),
        }
    }

    /// Canonical cache key: provider- and query-type-scoped so identical
    /// parameters sent to different providers never collide. Parameters
    /// are sorted so map ordering cannot perturb the key.
    pub fn cache_key(&self, provider: &str, query_type: &str, params: &[(&str, &str)]) -> String {
        let mut sorted: Vec<(&str, &str)> = params.to_vec();
        sorted.sort();
        let joined = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.trim().to_lowercase()))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}:{}:{}:{}", self.tenant, provider, query_type, joined)
    }

    /// Looks up a prior result. An entry whose age is greater than or
    /// equal to its TTL is a miss (lazy expiry; rows are swept separately).
    pub fn get(
        &self,
        provider: &str,
        query_type: &str,
        params: &[(&str, &str)],
    ) -> Result<Option<CachedResult>, DbError> {
        self.get_at(provider, query_type, params, Utc::now())
    }

    /// Lookup with an explicit clock, for TTL boundary tests.
    pub fn get_at(
        &self,
        provider: &str,
        query_type: &str,
        params: &[(&str, &str)],
        now: DateTime<Utc>,
    ) -> Result<Option<CachedResult>, DbError> {
        let key = self.cache_key(provider, query_type, params);
        let Some(row) = self.db.cache_get(&key)? else {
            return Ok(None);
        };

        let created = DateTime::parse_from_rfc3339(&row.created_at)?.with_timezone(&Utc);
        if now - created >= Duration::days(row.ttl_days) {
            tracing::debug!(%key, "cache entry expired");
            return Ok(None);
        }

        match row.status.as_str() {
            STATUS_SUCCESS => Ok(row.payload.map(CachedResult::Success)),
            status => Ok(Some(CachedResult::Failure {
                message: row.error_message.unwrap_or_default(),
                rate_limited: status == STATUS_RATE_LIMITED,
            })),
        }
    }

    /// Stores a successful payload with the provider's configured TTL.
    pub fn put(
        &self,
        provider: &str,
        query_type: &str,
        params: &[(&str, &str)],
        payload: &str,
        response_time_ms: Option<i64>,
    ) -> Result<(), DbError> {
        let key = self.cache_key(provider, query_type, params);
        self.db.cache_put(
            &key,
            &self.tenant,
            provider,
            query_type,
            STATUS_SUCCESS,
            Some(payload),
            None,
            response_time_ms,
            &Utc::now().to_rfc3339(),
            ttl_days(provider, query_type),
        )
    }

    /// Stores a failure. Rate-limit denials get the same short TTL but a
    /// distinct status so callers can tell throttling from breakage.
    pub fn put_error(
        &self,
        provider: &str,
        query_type: &str,
        params: &[(&str, &str)],
        message: &str,
        rate_limited: bool,
    ) -> Result<(), DbError> {
        let key = self.cache_key(provider, query_type, params);
        self.db.cache_put(
            &key,
            &self.tenant,
            provider,
            query_type,
            if rate_limited {
                STATUS_RATE_LIMITED
            } else {
                STATUS_ERROR
            },
            None,
            Some(message),
            None,
            &Utc::now().to_rfc3339(),
            ERROR_TTL_DAYS,
        )
    }

    /// Deletes entries past their TTL.
    pub fn sweep(&self) -> Result<usize, DbError> {
        self.db.cache_sweep(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    fn test_db() -> Db {
        let db = Db::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    #[test]
    fn key_is_order_insensitive_and_scoped() {
        let db = test_db();
        let cache = QueryCache::new(&db, "t1");
        let a = cache.cache_key("geocode", "search", &[("q", "Austin"), ("state", "TX")]);
        let b = cache.cache_key("geocode", "search", &[("state", "TX"), ("q", "Austin")]);
        assert_eq!(a, b);

        let other_provider = cache.cache_key("vat", "search", &[("q", "Austin"), ("state", "TX")]);
        assert_ne!(a, other_provider);

        let other_tenant = QueryCache::new(&db, "t2")
            .cache_key("geocode", "search", &[("q", "Austin"), ("state", "TX")]);
        assert_ne!(a, other_tenant);
    }

    #[test]
    fn round_trip_success() {
        let db = test_db();
        let cache = QueryCache::new(&db, "t1");
        let params = [("zip", "78701")];
        cache.put("salestax", "rates", &params, r#"{"state_rate":6.25}"#, Some(120)).unwrap();

        match cache.get("salestax", "rates", &params).unwrap() {
            Some(CachedResult::Success(payload)) => assert!(payload.contains("6.25")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn failure_entries_round_trip() {
        let db = test_db();
        let cache = QueryCache::new(&db, "t1");
        let params = [("zip", "78701")];
        cache.put_error("salestax", "rates", &params, "upstream 500", false).unwrap();

        match cache.get("salestax", "rates", &params).unwrap() {
            Some(CachedResult::Failure { message, rate_limited }) => {
                assert_eq!(message, "upstream 500");
                assert!(!rate_limited);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn entry_at_ttl_boundary_is_expired() {
        let db = test_db();
        let cache = QueryCache::new(&db, "t1");
        let params = [("q", "1100 Congress Ave")];
        cache.put("geocode", "search", &params, "{}", None).unwrap();

        let just_under = Utc::now() + Duration::days(30) - Duration::seconds(5);
        assert!(cache.get_at("geocode", "search", &params, just_under).unwrap().is_some());

        let at_boundary = Utc::now() + Duration::days(30) + Duration::seconds(1);
        assert!(cache.get_at("geocode", "search", &params, at_boundary).unwrap().is_none());
    }

    #[test]
    fn sweep_removes_expired_rows() {
        let db = test_db();
        let cache = QueryCache::new(&db, "t1");
        cache.put("geocode", "search", &[("q", "a")], "{}", None).unwrap();
        assert_eq!(db.cache_sweep(Utc::now() + Duration::days(31)).unwrap(), 1);
        assert_eq!(db.cache_sweep(Utc::now()).unwrap(), 0);
    }

    #[test]
    fn overwrite_refreshes_entry() {
        let db = test_db();
        let cache = QueryCache::new(&db, "t1");
        let params = [("zip", "78701")];
        cache.put_error("salestax", "rates", &params, "boom", false).unwrap();
        cache.put("salestax", "rates", &params, "ok", None).unwrap();
        assert_eq!(
            cache.get("salestax", "rates", &params).unwrap(),
            Some(CachedResult::Success("ok".into()))
        );
    }
}
