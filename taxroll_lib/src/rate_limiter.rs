//! Sliding-window rate limiting for outbound provider calls.
//!
//! Counters are kept per (tenant, provider, query-type) behind a `DashMap`,
//! each window a `VecDeque` of timestamps under its own mutex, so the
//! check-and-record step is atomic within the process. `allow` never
//! blocks: callers that are denied fall through to their fallback chain
//! (and cache a short-TTL rate-limited entry).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Per-provider request budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderLimits {
    pub max_requests: u64,
    pub window: Duration,
    /// Hard minimum spacing between consecutive requests, for providers
    /// with courtesy limits (Nominatim-class geocoders).
    pub min_spacing: Option<Duration>,
}

impl ProviderLimits {
    /// Budget for a named provider. Unknown providers get a conservative
    /// default.
    pub fn for_provider(provider: &str) -> Self {
        match provider {
            "geocode" => ProviderLimits {
                max_requests: 1,
                window: Duration::from_secs(1),
                min_spacing: Some(Duration::from_secs(1)),
            },
            "comptroller" => ProviderLimits {
                max_requests: 500,
                window: Duration::from_secs(60),
                min_spacing: None,
            },
            "salestax" => ProviderLimits {
                max_requests: 100,
                window: Duration::from_secs(60),
                min_spacing: None,
            },
            "vat" => ProviderLimits {
                max_requests: 60,
                window: Duration::from_secs(60),
                min_spacing: None,
            },
            _ => ProviderLimits {
                max_requests: 30,
                window: Duration::from_secs(60),
                min_spacing: None,
            },
        }
    }
}

/// Non-blocking sliding-window limiter keyed by (tenant, provider,
/// query-type).
#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<String, Mutex<VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true and records the call when the budget allows another
    /// request now; returns false (recording nothing) otherwise.
    pub fn allow(
        &self,
        tenant: &str,
        provider: &str,
        query_type: &str,
        limits: &ProviderLimits,
    ) -> bool {
        let key = format!("{}:{}:{}", tenant, provider, query_type);
        let window = self
            .windows
            .entry(key)
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut ts = window.lock().unwrap_or_else(|e| e.into_inner());

        let now = Instant::now();
        let cutoff = now - limits.window;
        while ts.front().is_some_and(|&t| t < cutoff) {
            ts.pop_front();
        }

        if (ts.len() as u64) >= limits.max_requests {
            tracing::debug!(provider, query_type, "rate limit window full");
            return false;
        }

        if let Some(spacing) = limits.min_spacing {
            if ts.back().is_some_and(|&last| now - last < spacing) {
                tracing::debug!(provider, query_type, "minimum spacing not elapsed");
                return false;
            }
        }

        ts.push_back(now);
        true
    }

    /// Remaining budget in the current window, or `None` under contention.
    pub fn remaining_budget(
        &self,
        tenant: &str,
        provider: &str,
        query_type: &str,
        limits: &ProviderLimits,
    ) -> Option<u64> {
        let key = format!("{}:{}:{}", tenant, provider, query_type);
        let window = self.windows.get(&key)?;
        let ts = window.try_lock().ok()?;
        let cutoff = Instant::now() - limits.window;
        let active = ts.iter().filter(|&&t| t >= cutoff).count() as u64;
        Some(limits.max_requests.saturating_sub(active))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max: u64, window_secs: u64) -> ProviderLimits {
        ProviderLimits {
            max_requests: max,
            window: Duration::from_secs(window_secs),
            min_spacing: None,
        }
    }

    #[tokio::test]
    async fn denies_over_budget() {
        let limiter = RateLimiter::new();
        let l = limits(3, 60);
        for _ in 0..3 {
            assert!(limiter.allow("t1", "comptroller", "rates", &l));
        }
        // The (N+1)-th call within the window must be denied.
        assert!(!limiter.allow("t1", "comptroller", "rates", &l));
    }

    #[tokio::test]
    async fn window_expiry_restores_budget() {
        tokio::time::pause();
        let limiter = RateLimiter::new();
        let l = limits(2, 10);

        assert!(limiter.allow("t1", "salestax", "rates", &l));
        assert!(limiter.allow("t1", "salestax", "rates", &l));
        assert!(!limiter.allow("t1", "salestax", "rates", &l));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(limiter.allow("t1", "salestax", "rates", &l));
    }

    #[tokio::test]
    async fn keys_are_isolated() {
        let limiter = RateLimiter::new();
        let l = limits(1, 60);
        assert!(limiter.allow("t1", "salestax", "rates", &l));
        // Different tenant and different query type have their own windows.
        assert!(limiter.allow("t2", "salestax", "rates", &l));
        assert!(limiter.allow("t1", "salestax", "validate", &l));
        assert!(!limiter.allow("t1", "salestax", "rates", &l));
    }

    #[tokio::test]
    async fn min_spacing_enforced() {
        tokio::time::pause();
        let limiter = RateLimiter::new();
        let l = ProviderLimits {
            max_requests: 100,
            window: Duration::from_secs(60),
            min_spacing: Some(Duration::from_secs(1)),
        };

        assert!(limiter.allow("t1", "geocode", "search", &l));
        assert!(!limiter.allow("t1", "geocode", "search", &l));

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(limiter.allow("t1", "geocode", "search", &l));
    }

    #[tokio::test]
    async fn remaining_budget_decrements() {
        let limiter = RateLimiter::new();
        let l = limits(5, 60);
        limiter.allow("t1", "vat", "validate", &l);
        limiter.allow("t1", "vat", "validate", &l);
        assert_eq!(limiter.remaining_budget("t1", "vat", "validate", &l), Some(3));
    }
}
