use std::future::Future;
use std::time::Duration;

use crate::error::DriverError;

/// Bounded retry: at most `max_attempts` tries, `delay` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A single attempt with no delay.
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Upper bound on the time spent sleeping between attempts.
    pub fn budget(&self) -> Duration {
        self.delay * (self.attempts() - 1)
    }

    /// Run `op` until it succeeds or the attempts are exhausted.
    ///
    /// The closure receives the 1-based attempt number. The last error is returned.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, DriverError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        let attempts = self.attempts();
        let mut last_err = DriverError::timeout(what, self.budget());

        for attempt in 1..=attempts {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::debug!(what, attempt, attempts, error = %e, "Attempt failed");
                    last_err = e;
                }
            }
            if attempt < attempts && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        Err(last_err)
    }

    /// Poll `probe` until it yields a value.
    ///
    /// Probe errors abort the poll immediately; running out of attempts
    /// is reported as [`DriverError::Timeout`].
    pub async fn poll<T, F, Fut>(&self, what: &str, mut probe: F) -> Result<T, DriverError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, DriverError>>,
    {
        let attempts = self.attempts();
        for attempt in 1..=attempts {
            if let Some(value) = probe().await? {
                return Ok(value);
            }
            if attempt < attempts && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
        Err(DriverError::timeout(what, self.budget()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn run_returns_first_success() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result = policy
            .run("flaky", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(DriverError::Action("boom".to_string()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_returns_last_error_when_exhausted() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let result: Result<(), _> = policy
            .run("broken", |attempt| async move {
                Err(DriverError::Action(format!("attempt {attempt}")))
            })
            .await;

        assert_eq!(result, Err(DriverError::Action("attempt 3".to_string())));
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        let calls = AtomicU32::new(0);
        let _ = policy
            .run("once", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, DriverError>(()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn poll_times_out_without_value() {
        let policy = RetryPolicy::new(4, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<u32, _> = policy
            .poll("row", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(None) }
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn poll_propagates_probe_errors() {
        let policy = RetryPolicy::new(4, Duration::ZERO);
        let result: Result<u32, _> = policy
            .poll("row", || async { Err(DriverError::SessionClosed) })
            .await;
        assert_eq!(result, Err(DriverError::SessionClosed));
    }

    #[test]
    fn budget_counts_gaps_between_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        assert_eq!(policy.budget(), Duration::from_secs(4));
        assert_eq!(RetryPolicy::once().budget(), Duration::ZERO);
    }
}
