//! Bounded retries with exponential backoff, and per-call timeouts.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::StageFailure;
use crate::models::RetryConfigSection;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Backoff multiplier (delay *= multiplier after each retry).
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetryConfigSection::default())
    }
}

impl From<&RetryConfigSection> for RetryConfig {
    fn from(section: &RetryConfigSection) -> Self {
        Self {
            max_retries: section.max_retries.max(1),
            initial_delay: Duration::from_millis(section.initial_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
            ..Default::default()
        }
    }

    /// A single attempt, no backoff.
    #[must_use]
    pub fn none() -> Self {
        Self::new(1)
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }
}

/// Determines if an error is worth another attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    let mut delay = config.initial_delay;

    loop {
        attempts += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempts >= config.max_retries || !error.is_retryable() {
                    return Err(error);
                }

                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure, retrying"
                );

                let jitter_ms = jitter(delay.as_millis() as u64 / 4);
                sleep(delay + Duration::from_millis(jitter_ms)).await;

                delay = Duration::from_secs_f64(delay.as_secs_f64() * config.multiplier)
                    .min(config.max_delay);
            }
        }
    }
}

/// Bound a future by `after`; expiry becomes [`StageFailure::Timeout`].
pub async fn with_timeout<T, E, Fut>(
    operation: &'static str,
    after: Duration,
    future: Fut,
) -> Result<T, StageFailure>
where
    E: Into<StageFailure>,
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(after, future).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(StageFailure::Timeout { operation, after }),
    }
}

fn jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    seed % max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VectorStoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.0.contains("transient")
        }
    }

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig::new(max_retries).with_initial_delay(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let result = with_retry(&fast(3), "test", || async {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TestError("transient"))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let counter = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast(5), "test", || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TestError("bad input"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let counter = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast(3), "test", || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TestError("transient"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_none_makes_one_attempt() {
        let counter = AtomicU32::new(0);
        let _: Result<(), _> = with_retry(&RetryConfig::none(), "test", || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TestError("transient"))
        })
        .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_stage_failure() {
        let result: Result<(), StageFailure> =
            with_timeout("slow call", Duration::from_millis(10), async {
                sleep(Duration::from_secs(5)).await;
                Ok::<(), VectorStoreError>(())
            })
            .await;

        match result {
            Err(StageFailure::Timeout { operation, .. }) => assert_eq!(operation, "slow call"),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_passes_inner_error_through() {
        let result: Result<(), StageFailure> =
            with_timeout("fast call", Duration::from_secs(1), async {
                Err(VectorStoreError::SearchError("boom".to_string()))
            })
            .await;
        assert!(matches!(result, Err(StageFailure::VectorStore(_))));
    }
}
