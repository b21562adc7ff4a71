//! Retry logic.
//!
//! # Responsibilities
//! - Classify failures through an injected predicate
//! - Execute retries with exponential backoff + jitter
//! - Wrap the final failure once the attempt budget is spent
//!
//! # Design Decisions
//! - Stateless: the policy is passed per call
//! - Non-retryable errors are returned unchanged on first occurrence
//! - Jittered backoff prevents synchronized retry storms
//! - Retry events are advisory and never alter control flow

use std::future::Future;
use std::sync::Arc;
use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::error::{ResilienceError, Result};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Predicate deciding whether an error is worth another attempt.
pub type Classifier = Arc<dyn Fn(&ResilienceError) -> bool + Send + Sync>;

/// Retry configuration plus the retryability classifier.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    is_retryable: Classifier,
}

impl RetryPolicy {
    /// Policy that retries only [`ResilienceError::Transient`] errors.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            is_retryable: Arc::new(ResilienceError::is_transient),
        }
    }

    /// Replace the classifier.
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&ResilienceError) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Arc::new(classifier);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn is_retryable(&self, err: &ResilienceError) -> bool {
        (self.is_retryable)(err)
    }

    /// Attempt budget; a configured 0 still allows the first attempt.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self::new(config)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Executor for retrying async operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor;

impl RetryExecutor {
    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the policy's attempt budget is spent.
    pub async fn run<F, Fut, T>(name: &str, mut operation: F, policy: &RetryPolicy) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = policy.max_attempts();
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(operation = %name, attempts = attempt, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !policy.is_retryable(&err) {
                        tracing::debug!(
                            operation = %name,
                            attempt,
                            kind = err.kind(),
                            "Non-retryable error, giving up"
                        );
                        return Err(err);
                    }

                    if attempt >= max_attempts {
                        tracing::warn!(
                            operation = %name,
                            attempts = attempt,
                            error = %err,
                            "All retry attempts exhausted"
                        );
                        return Err(ResilienceError::RetriesExhausted {
                            operation: name.to_string(),
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }

                    let delay = calculate_backoff(attempt, policy.config());
                    tracing::info!(
                        operation = %name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying operation"
                    );
                    metrics::record_retry_attempt(name);

                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
