//! Single-flight gate, timeout, and retry around a [`ContentSource`].

use super::{ContentSource, GenerationRequest};
use crate::config::RetryConfig;
use crate::error::GenerationError;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Permanent errors (see [`GenerationError::is_transient`]) return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, GenerationError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !e.is_transient() || attempt >= config.max_retries {
                    return Err(e);
                }
                let backoff_ms = compute_backoff(config, attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying generation after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

fn compute_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    base.min(config.max_backoff_ms as f64) as u64
}

/// Run-wide wrapper: one call in flight at a time, bounded by a timeout,
/// retried on transient failure.
pub struct ThrottledSource {
    inner: Arc<dyn ContentSource>,
    gate: Semaphore,
    retry: RetryConfig,
    timeout: Duration,
    calls: AtomicU64,
    failed_attempts: AtomicU64,
}

impl ThrottledSource {
    pub fn new(inner: Arc<dyn ContentSource>, retry: RetryConfig, timeout_secs: u64) -> Self {
        Self {
            inner,
            gate: Semaphore::new(1),
            retry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            calls: AtomicU64::new(0),
            failed_attempts: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn is_model(&self) -> bool {
        self.inner.is_model()
    }

    /// Successful calls so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Attempts that ended in an error (retried or not).
    pub fn failed_attempts(&self) -> u64 {
        self.failed_attempts.load(Ordering::Relaxed)
    }

    pub async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        let this = self;
        with_retry(&self.retry, move || async move {
            let result = {
                let _permit = this.gate.acquire().await.map_err(|e| GenerationError::Request {
                    message: format!("generation gate closed: {e}"),
                })?;
                match tokio::time::timeout(this.timeout, this.inner.generate(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(GenerationError::Timeout {
                        timeout_secs: this.timeout.as_secs(),
                    }),
                }
            };
            match &result {
                Ok(_) => this.calls.fetch_add(1, Ordering::Relaxed),
                Err(_) => this.failed_attempts.fetch_add(1, Ordering::Relaxed),
            };
            result
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 2.0,
        }
    }

    /// Fails the first `failures` calls with the given error, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        transient: bool,
    }

    #[async_trait]
    impl ContentSource for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn generate(&self, _request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                if self.transient {
                    Err(GenerationError::EmptyResponse)
                } else {
                    Err(GenerationError::ResponseParse {
                        message: "bad".into(),
                    })
                }
            } else {
                Ok("ok".into())
            }
        }
    }

    fn request() -> GenerationRequest<'static> {
        GenerationRequest::Interpretation {
            stream: "s",
            summary: "x",
        }
    }

    #[test]
    fn test_compute_backoff_exponential_and_capped() {
        let config = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 3000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(compute_backoff(&config, 0), 1000);
        assert_eq!(compute_backoff(&config, 1), 2000);
        assert_eq!(compute_backoff(&config, 2), 3000);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let flaky = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
            transient: true,
        });
        let source = ThrottledSource::new(flaky.clone(), fast_retry(3), 5);
        assert_eq!(source.generate(&request()).await.unwrap(), "ok");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(source.calls(), 1);
        assert_eq!(source.failed_attempts(), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let flaky = Arc::new(Flaky {
            failures: 5,
            calls: AtomicU32::new(0),
            transient: false,
        });
        let source = ThrottledSource::new(flaky.clone(), fast_retry(3), 5);
        assert!(source.generate(&request()).await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_returns_last_error() {
        let flaky = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
            transient: true,
        });
        let source = ThrottledSource::new(flaky.clone(), fast_retry(2), 5);
        assert!(matches!(
            source.generate(&request()).await,
            Err(GenerationError::EmptyResponse)
        ));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(source.calls(), 0);
    }

    struct Slow;

    #[async_trait]
    impl ContentSource for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("late".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_surfaces_as_generation_error() {
        let source = ThrottledSource::new(Arc::new(Slow), fast_retry(0), 1);
        assert!(matches!(
            source.generate(&request()).await,
            Err(GenerationError::Timeout { timeout_secs: 1 })
        ));
    }
}
