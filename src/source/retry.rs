use super::{SourceError, SourceResult, remaining};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Exponential backoff for upstream calls: base delay doubled per attempt,
/// capped at 8x base. A retry is only issued while its delay still fits in
/// the remaining deadline.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        return RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        };
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        return RetryPolicy {
            max_retries,
            base_delay,
        };
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(3);
        return self.base_delay.saturating_mul(factor).min(self.base_delay * 8);
    }

    /// Drive `op` to success or a terminal error. Total attempts are at most
    /// `max_retries + 1`; non-retryable errors and 4xx bail out immediately.
    pub async fn run<T, F, Fut>(&self, deadline: Instant, mut op: F) -> SourceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            if remaining(deadline).is_none() {
                return Err(SourceError::Timeout);
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.max_retries {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    match remaining(deadline) {
                        Some(left) if left > delay => {}
                        _ => {
                            log::debug!("Not retrying, {:?} delay exceeds the deadline", delay);
                            return Err(err);
                        }
                    }
                    log::debug!(
                        "Retrying after {:?} (attempt {}/{}): {}",
                        delay,
                        attempt + 1,
                        self.max_retries,
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn far_deadline() -> Instant {
        return Instant::now() + Duration::from_secs(60);
    }

    #[tokio::test]
    async fn test_no_retry_on_4xx() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result: SourceResult<()> = policy
            .run(far_deadline(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SourceError::Rejected {
                        status: 400,
                        detail: "bad request".into(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_bounded_by_max_retries() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let result: SourceResult<()> = policy
            .run(far_deadline(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::Unavailable("down".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result = policy
            .run(far_deadline(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(SourceError::Rejected {
                            status: 502,
                            detail: "bad gateway".into(),
                        })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_respects_deadline() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_secs(10));
        // The first retry delay (10s) cannot fit into a 50ms deadline.
        let deadline = Instant::now() + Duration::from_millis(50);
        let result: SourceResult<()> = policy
            .run(deadline, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::Unavailable("down".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_cap() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1));
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(9), Duration::from_secs(8));
    }
}
