//! Bounded retry for round-store calls.
//!
//! Every call routed through here must be idempotent: a timed-out attempt may
//! still have landed. Round creation is keyed by commitment hash for this
//! reason. Balance mutations are never retried.

use crate::config::GameConfig;
use crate::errors::{StoreError, StoreResult};
use rand::{Rng, RngCore};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay before retry number `retry` (1-based): the base doubled per retry,
/// then drawn uniformly from the upper half of that window.
pub(crate) fn retry_delay(rng: &mut impl RngCore, base: Duration, retry: u32) -> Duration {
    let window_ms = (base.as_millis() as u64).saturating_mul(1u64 << retry.saturating_sub(1).min(16));
    if window_ms <= 1 {
        return Duration::from_millis(window_ms);
    }
    let floor_ms = window_ms / 2;
    Duration::from_millis(rng.gen_range(floor_ms..=window_ms))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GameConfig) -> Self {
        Self {
            attempts: config.persist_attempts.max(1),
            backoff: Duration::from_millis(config.persist_backoff_ms),
            timeout: Duration::from_millis(config.persist_timeout_ms),
        }
    }

    /// One retry after the first failure (audit-log writes)
    pub fn retry_once(self) -> Self {
        Self { attempts: 2, ..self }
    }
}

/// Run `call` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are spent. Each attempt is bounded by `policy.timeout`.
pub async fn with_retry<T, F, Fut>(op: &'static str, policy: RetryPolicy, mut call: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => StoreError::Timeout {
                op,
                timeout_ms: policy.timeout.as_millis() as u64,
            },
        };

        if attempt >= attempts || !error.is_retryable() {
            return Err(error);
        }

        warn!(op, attempt, error = %error, "store call failed; retrying");
        let delay = retry_delay(&mut rand::thread_rng(), policy.backoff, attempt);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            backoff: Duration::from_millis(10),
            timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_retry_delay_doubles_within_jitter_window() {
        let mut rng = rand::thread_rng();
        let base = Duration::from_millis(200);
        for _ in 0..100 {
            let first = retry_delay(&mut rng, base, 1);
            assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(200));
            let third = retry_delay(&mut rng, base, 3);
            assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(800));
        }
        assert_eq!(retry_delay(&mut rng, Duration::ZERO, 4), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry("create_round", policy(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Database("busy".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_retry("record_bet", policy(3).retry_once(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Database("down".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_retry("finalize_round", policy(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::NotFound("round 9".to_string())) }
        })
        .await;

        assert_eq!(result, Err(StoreError::NotFound("round 9".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out() {
        let result: StoreResult<()> = with_retry("create_round", policy(1), || async {
            std::future::pending::<()>().await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(StoreError::Timeout { op: "create_round", .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_that_landed_before_timeout_is_not_duplicated() {
        use crate::fairness::RoundCommitment;
        use crate::store::{MemoryRoundStore, RoundStore};

        let store = MemoryRoundStore::new();
        let commitment = RoundCommitment::from_secret([8u8; 32], 25);
        let secret = commitment.secret_hex();
        let calls = AtomicU32::new(0);

        let result = with_retry("create_round", policy(3), || {
            let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
            let store = &store;
            let (crash_point, secret, hash) = (commitment.crash_point, &secret, &commitment.hash);
            async move {
                let id = store.create_round(crash_point, secret, hash).await?;
                if first {
                    // Committed, but the reply never arrives in time
                    std::future::pending::<()>().await;
                }
                Ok(id)
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result, Ok(crate::types::RoundId(1)));
        assert_eq!(store.round_count(), 1);
    }
}
