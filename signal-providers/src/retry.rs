//! Exponential backoff with jitter for provider calls

use super::error::ProviderError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Retry behaviour for one provider
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled for each further attempt
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Random extra delay in [0, jitter) added to every wait
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy allowing `max_retries` attempts (at least one)
    pub fn from_max_retries(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.max(1),
            ..Default::default()
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after the zero-based `attempt` failed
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(self.max_delay);
        let jitter = self.jitter.mul_f64(fastrand::f64());
        (exponential + jitter).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy runs out of attempts
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    provider: &str,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                error!("{}: non-retryable failure: {}", provider, e);
                return Err(e);
            }
            Err(e) if attempt + 1 >= max_attempts => {
                error!("{}: all {} attempts failed, last error: {}", provider, max_attempts, e);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.backoff_delay(attempt);
                warn!(
                    "{}: attempt {}/{} failed ({}), retrying in {:.2}s",
                    provider,
                    attempt + 1,
                    max_attempts,
                    e.kind(),
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                debug!("{}: starting attempt {}", provider, attempt + 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: Duration::ZERO,
        }
    }

    fn rate_limited() -> ProviderError {
        ProviderError::RateLimit {
            provider: "grok".to_string(),
            message: "429".to_string(),
        }
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = RetryPolicy::default().with_jitter(Duration::ZERO);
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(60));
        assert_eq!(policy.backoff_delay(40), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.backoff_delay(0);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay < Duration::from_secs(2));
        }
    }

    #[test]
    fn test_from_max_retries_never_zero() {
        assert_eq!(RetryPolicy::from_max_retries(0).max_attempts, 1);
        assert_eq!(RetryPolicy::from_max_retries(5).max_attempts, 5);
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_with_backoff(&fast_policy(3), "grok", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(rate_limited())
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_with_backoff(&fast_policy(3), "grok", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(rate_limited())
        })
        .await;

        assert!(matches!(result, Err(ProviderError::RateLimit { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_authentication_never_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_with_backoff(&fast_policy(5), "openai", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Authentication {
                provider: "openai".to_string(),
                message: "401".to_string(),
            })
        })
        .await;

        assert!(result.unwrap_err().is_authentication());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
