use std::future::Future;
use std::time::Duration;

use crate::errors::GenerateError;

/// Backoff schedule for rate-limited generation calls: with the defaults,
/// retries wait 2s, 4s, 8s and give up after the third.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry_no` (1-based): base * 2^(n-1).
    pub fn backoff_delay(&self, retry_no: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry_no.saturating_sub(1))
    }
}

/// Runs `op`, retrying only rate-limit errors. `Transient` and `Fatal`
/// propagate immediately; retrying a bad request or auth failure burns
/// quota with no chance of a different answer.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, GenerateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenerateError>>,
{
    let mut retry_no = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_rate_limit() && retry_no < policy.max_retries => {
                retry_no += 1;
                let delay = policy.backoff_delay(retry_no);
                tracing::warn!(
                    retry = retry_no,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn backoff_schedule_doubles_from_two_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(4000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(8000));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retries_then_gives_up() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let result: Result<(), _> = with_backoff(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GenerateError::RateLimited("429".into())) }
        })
        .await;
        assert!(matches!(result, Err(GenerateError::RateLimited(_))));
        // 1 initial + 3 retries, 2s + 4s + 8s of paused-clock sleeping
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_throttling() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result = with_backoff(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(GenerateError::RateLimited("slow down".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_never_retried() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let result: Result<(), _> = with_backoff(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GenerateError::Fatal("401: bad key".into())) }
        })
        .await;
        assert!(matches!(result, Err(GenerateError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_propagate_immediately() {
        let policy = RetryPolicy::default();
        let result: Result<(), _> = with_backoff(&policy, || async {
            Err(GenerateError::Transient("502".into()))
        })
        .await;
        assert!(matches!(result, Err(GenerateError::Transient(_))));
    }
}
