//! Ordered fallback chain.
//!
//! Producers are registered per key with a priority and tried from highest
//! to lowest (registration order on ties) until one succeeds. Meant to be
//! consulted only after the primary pipeline has failed.

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{ResilienceError, Result};
use crate::observability::metrics;

type Producer<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

struct FallbackEntry<T> {
    priority: i32,
    seq: u64,
    producer: Producer<T>,
}

impl<T> Clone for FallbackEntry<T> {
    fn clone(&self) -> Self {
        Self {
            priority: self.priority,
            seq: self.seq,
            producer: self.producer.clone(),
        }
    }
}

/// A producer that failed before the chain resolved.
#[derive(Debug)]
pub struct FallbackFailure {
    pub priority: i32,
    pub error: ResilienceError,
}

/// Successful resolution with the trace of earlier failures.
#[derive(Debug)]
pub struct Resolution<T> {
    pub value: T,
    /// Priority of the producer that succeeded.
    pub priority: i32,
    /// Failures of higher-priority producers, in the order they were tried.
    pub failures: Vec<FallbackFailure>,
}

/// Registry of alternative producers keyed by name.
pub struct FallbackChain<T> {
    entries: DashMap<String, Vec<FallbackEntry<T>>>,
    next_seq: AtomicU64,
}

impl<T> Default for FallbackChain<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }
}

impl<T: Send + 'static> FallbackChain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `producer` for `key`. Higher priority is tried first.
    pub fn register<F, Fut>(&self, key: impl Into<String>, producer: F, priority: i32)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let entry = FallbackEntry {
            priority,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            producer: Arc::new(move || producer().boxed()),
        };

        let mut list = self.entries.entry(key.into()).or_default();
        // Insert after every entry with priority >= ours to keep ties stable.
        let pos = list.partition_point(|e| e.priority >= priority);
        list.insert(pos, entry);
    }

    /// Try producers for `key` in priority order; return the first success.
    pub async fn resolve(&self, key: &str) -> Result<Resolution<T>> {
        // Snapshot so no map lock is held across an await.
        let chain: Vec<FallbackEntry<T>> = self
            .entries
            .get(key)
            .map(|list| list.value().clone())
            .unwrap_or_default();

        let mut failures = Vec::with_capacity(chain.len());
        for entry in chain {
            match (entry.producer)().await {
                Ok(value) => {
                    tracing::info!(
                        key = %key,
                        priority = entry.priority,
                        seq = entry.seq,
                        failed_before = failures.len(),
                        "Fallback succeeded"
                    );
                    metrics::record_fallback_attempt(key, "success");
                    return Ok(Resolution {
                        value,
                        priority: entry.priority,
                        failures,
                    });
                }
                Err(error) => {
                    tracing::warn!(key = %key, priority = entry.priority, error = %error, "Fallback failed");
                    metrics::record_fallback_attempt(key, "failure");
                    failures.push(FallbackFailure {
                        priority: entry.priority,
                        error,
                    });
                }
            }
        }

        tracing::error!(key = %key, attempts = failures.len(), "All fallbacks exhausted");
        Err(ResilienceError::FallbacksExhausted {
            key: key.to_string(),
            errors: failures.into_iter().map(|f| f.error).collect(),
        })
    }

    /// Number of producers registered for `key`.
    pub fn len(&self, key: &str) -> usize {
        self.entries.get(key).map(|list| list.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|list| list.is_empty())
    }

    /// Keys with at least one producer.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Remove every producer for `key`.
    pub fn clear(&self, key: &str) {
        self.entries.remove(key);
    }
}
