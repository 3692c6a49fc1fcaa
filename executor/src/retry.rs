//! Retry policy for the Executor's dispatch loop (`spec.md` §4.3 step 4).
//!
//! A small focused helper rather than a third-party backoff crate: the
//! policy here is exactly "retry transient failures with exponential
//! backoff and full jitter, up to a bounded number of attempts", which
//! doesn't warrant pulling in a tower-style retry layer.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// What a dispatch attempt decided about its own failure.
pub enum Outcome<E> {
    /// Worth trying again (`Disposition::Transient`, or a bare transport
    /// error reaching the remote).
    Retry(E),
    /// Not worth trying again (`Disposition::Fatal`, or success).
    Fatal(E),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Full-jitter delay for the given zero-based attempt number, per
    /// Marc Brooker's "exponential backoff and jitter": sample uniformly
    /// from `[0, min(max_delay, base_delay * 2^attempt)]`.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        let cap = exp.min(self.max_delay);
        if cap.is_zero() {
            return cap;
        }
        let millis = rand::thread_rng().gen_range(0..=cap.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

/// Runs `attempt` up to `policy.max_attempts` times, sleeping with full
/// jitter between retryable failures. `attempt` classifies its own result
/// into [`Outcome::Retry`] or [`Outcome::Fatal`].
pub async fn with_backoff<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut attempt: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Outcome<E>>>,
{
    let mut last_err = None;
    for attempt_no in 0..policy.max_attempts {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(Outcome::Fatal(err)) => return Err(err),
            Err(Outcome::Retry(err)) => {
                let remaining = policy.max_attempts - attempt_no - 1;
                if remaining == 0 {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt_no);
                warn!(%label, attempt = attempt_no + 1, remaining, delay_ms = delay.as_millis() as u64, "retrying after transient failure");
                last_err = Some(err);
                tokio::time::sleep(delay).await;
            }
        }
    }
    // Unreachable in practice (max_attempts >= 1 means either the loop
    // returns or the remaining == 0 branch above fires), kept for totality.
    Err(last_err.expect("at least one attempt runs when max_attempts >= 1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let policy = RetryPolicy::default();
        let result: Result<u32, ()> = with_backoff(&policy, "test", || async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32, &'static str> = with_backoff(&policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Outcome::Retry("transient"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_does_not_retry() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32, &'static str> = with_backoff(&policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Outcome::Fatal("bad request")) }
        })
        .await;
        assert_eq!(result, Err("bad request"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_last_error() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let result: Result<u32, &'static str> =
            with_backoff(&policy, "test", || async { Err(Outcome::Retry("still failing")) }).await;
        assert_eq!(result, Err("still failing"));
    }
}
