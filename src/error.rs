//! Error taxonomy shared by every resilience component.
//!
//! Upstream failures enter the toolkit already classified as either
//! [`ResilienceError::Transient`] or [`ResilienceError::Permanent`]; the
//! remaining variants are produced by the components themselves.

use std::time::Duration;
use thiserror::Error;

/// Boxed upstream error carried inside classified variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the resilience components.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// Circuit breaker is open; the operation was not attempted.
    #[error("circuit '{resource}' is open, next trial in {retry_after:?}")]
    CircuitOpen { resource: String, retry_after: Duration },

    /// Upstream failure that may succeed if attempted again.
    #[error("transient upstream error: {0}")]
    Transient(#[source] BoxError),

    /// Upstream failure that will not succeed on retry.
    #[error("permanent upstream error: {0}")]
    Permanent(#[source] BoxError),

    /// Retry budget spent; wraps the error of the final attempt.
    #[error("'{operation}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<ResilienceError>,
    },

    /// Every registered fallback producer failed.
    #[error("all {} fallbacks exhausted for '{key}'", .errors.len())]
    FallbacksExhausted {
        key: String,
        errors: Vec<ResilienceError>,
    },

    /// Bulkhead is at capacity and its wait queue is full.
    #[error("bulkhead '{name}' is full (queue limit {max_queue})")]
    BulkheadFull { name: String, max_queue: usize },

    /// Caller cancelled while waiting for a bulkhead slot.
    #[error("wait for bulkhead '{name}' was cancelled")]
    BulkheadCancelled { name: String },

    /// Deadline passed while waiting for a bulkhead slot.
    #[error("timed out after {waited:?} waiting for bulkhead '{name}'")]
    BulkheadTimeout { name: String, waited: Duration },

    /// `refresh` was called for a key with no registered fetcher.
    #[error("no fetcher registered for cache key '{key}'")]
    NoFetcher { key: String },

    /// Cache invalidation pattern did not compile.
    #[error("invalid cache key pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl ResilienceError {
    /// Classify an upstream error as retryable.
    pub fn transient<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Transient(err.into())
    }

    /// Classify an upstream error as non-retryable.
    pub fn permanent<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Permanent(err.into())
    }

    /// True only for [`ResilienceError::Transient`].
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// True for rejections produced by a bulkhead.
    pub fn is_bulkhead_rejection(&self) -> bool {
        matches!(
            self,
            Self::BulkheadFull { .. } | Self::BulkheadCancelled { .. } | Self::BulkheadTimeout { .. }
        )
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Transient(_) => "transient",
            Self::Permanent(_) => "permanent",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::FallbacksExhausted { .. } => "fallbacks_exhausted",
            Self::BulkheadFull { .. } => "bulkhead_full",
            Self::BulkheadCancelled { .. } => "bulkhead_cancelled",
            Self::BulkheadTimeout { .. } => "bulkhead_timeout",
            Self::NoFetcher { .. } => "no_fetcher",
            Self::InvalidPattern(_) => "invalid_pattern",
        }
    }
}

/// Result type for resilience operations.
pub type Result<T> = std::result::Result<T, ResilienceError>;
