//! Exponential backoff with full jitter for rate-limited provider calls

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::{Error, Result};

/// Retry policy for HTTP 403/429 responses.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Upper bound for the sleep before retry `attempt` (0-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        exp.min(self.cap)
    }

    /// Full-jitter delay: uniform in `[0, ceiling(attempt)]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

/// Run `op`, retrying on `Error::RateLimited` per the policy.
///
/// Non-retryable errors are returned immediately. When attempts are
/// exhausted the last `RateLimited` error is surfaced with its
/// retry-after hint intact.
pub async fn with_backoff<T, F, Fut>(policy: &BackoffPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_ceiling_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.ceiling(0), Duration::from_millis(500));
        assert_eq!(policy.ceiling(1), Duration::from_millis(1000));
        assert_eq!(policy.ceiling(2), Duration::from_millis(2000));
        assert_eq!(policy.ceiling(10), Duration::from_secs(30));
        assert_eq!(policy.ceiling(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_within_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 0..8 {
            let delay = policy.delay(attempt);
            assert!(delay <= policy.ceiling(attempt));
        }
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let policy = BackoffPolicy::default();
        let result: Result<u32> = with_backoff(&policy, || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let policy = BackoffPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_backoff(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::NotFound("missing".into())) }
        })
        .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts_on_rate_limit() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(2),
            max_attempts: 3,
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_backoff(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(Error::RateLimited {
                    retry_after_secs: Some(9),
                })
            }
        })
        .await;
        assert!(matches!(
            result,
            Err(Error::RateLimited {
                retry_after_secs: Some(9)
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_rate_limit() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(2),
            max_attempts: 5,
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_backoff(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::RateLimited {
                        retry_after_secs: None,
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
