//! Capped retry with fixed delay and jitter for provider calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Retry policy: a fixed number of attempts with a fixed inter-attempt
/// delay. Jitter (0.8-1.2x) avoids thundering herds across tenants.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    fn jittered_delay(&self) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        Duration::from_millis((self.delay.as_millis() as f64 * jitter) as u64)
    }
}

/// Runs `f` up to `1 + max_retries` times, sleeping between attempts.
/// Only errors for which `is_retryable` returns true are retried; others
/// propagate immediately. Every retry is logged.
pub async fn with_retry<T, E, F, Fut, P>(
    label: &str,
    cfg: RetryConfig,
    is_retryable: P,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0usize;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt > cfg.max_retries || !is_retryable(&err) {
                    return Err(err);
                }
                let delay = cfg.jittered_delay();
                tracing::warn!(
                    "{} request failed (attempt {}/{}): {}, retrying in {:.1}s",
                    label,
                    attempt,
                    cfg.max_retries,
                    err,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Transient;
    impl std::fmt::Display for Transient {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "transient")
        }
    }

    #[tokio::test]
    async fn succeeds_first_attempt() {
        let cfg = RetryConfig::default();
        let result: Result<i32, Transient> =
            with_retry("test", cfg, |_| true, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let cfg = RetryConfig {
            max_retries: 3,
            delay: Duration::from_millis(10),
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let result = with_retry("test", cfg, |_: &Transient| true, move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Transient)
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_retries() {
        let cfg = RetryConfig {
            max_retries: 2,
            delay: Duration::from_millis(10),
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let result: Result<i32, Transient> = with_retry("test", cfg, |_| true, move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Transient)
            }
        })
        .await;
        assert!(result.is_err());
        // 1 initial + 2 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_propagates_immediately() {
        let cfg = RetryConfig::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let result: Result<i32, Transient> = with_retry("test", cfg, |_| false, move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Transient)
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
