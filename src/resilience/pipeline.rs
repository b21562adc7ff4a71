//! Composition of the resilience components around one call.
//!
//! # Call Path
//! ```text
//! Pipeline::call(key, fetcher)
//!     → bulkhead        (admission, FIFO wait)
//!     → circuit breaker (fail fast when open)
//!     → retry executor  (transient failures, backoff)
//!     → cache-aside     (hit / fetch / stale)
//!     → fetcher
//!
//! On error: fallback chain for `key`, if one is attached and has producers.
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::bulkhead::{Admission, Bulkhead};
use super::circuit_breaker::CircuitBreaker;
use super::fallback::FallbackChain;
use super::registry::ResilienceRegistry;
use super::retries::{RetryExecutor, RetryPolicy};
use crate::cache::{CacheAside, Freshness};
use crate::error::Result;

/// Which path produced a pipeline result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedBy {
    /// The protected call (through the cache when one is attached).
    Primary(Freshness),
    /// A fallback producer of the given priority.
    Fallback { priority: i32 },
}

/// A pipeline result and its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Served<V> {
    pub value: V,
    pub served_by: ServedBy,
}

/// Bulkhead → CircuitBreaker → Retry → Cache around a fetcher.
pub struct Pipeline<V> {
    name: String,
    bulkhead: Bulkhead,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    cache: Option<Arc<CacheAside<V>>>,
    cache_ttl: Option<Duration>,
    fallback: Option<Arc<FallbackChain<V>>>,
}

impl<V: Clone + Send + Sync + 'static> Pipeline<V> {
    pub fn new(
        name: impl Into<String>,
        bulkhead: Bulkhead,
        breaker: CircuitBreaker,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            bulkhead,
            breaker,
            retry,
            cache: None,
            cache_ttl: None,
            fallback: None,
        }
    }

    /// Pipeline for `resource` using the registry's shared components.
    pub fn from_registry(registry: &ResilienceRegistry, resource: &str) -> Self {
        Self::new(
            resource,
            registry.bulkhead(resource),
            registry.breaker(resource),
            registry.retry_policy(resource),
        )
    }

    /// Serve through `cache`; `ttl` of `None` uses the cache default.
    pub fn with_cache(mut self, cache: Arc<CacheAside<V>>, ttl: Option<Duration>) -> Self {
        self.cache = Some(cache);
        self.cache_ttl = ttl;
        self
    }

    /// Consult `chain` when the protected call fails.
    pub fn with_fallback(mut self, chain: Arc<FallbackChain<V>>) -> Self {
        self.fallback = Some(chain);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn bulkhead(&self) -> &Bulkhead {
        &self.bulkhead
    }

    /// Run `fetcher` for `key` through every stage.
    pub async fn call<F, Fut>(&self, key: &str, fetcher: F) -> Result<Served<V>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        self.call_with(key, fetcher, Admission::default()).await
    }

    /// Like [`call`](Self::call) with explicit bulkhead admission options.
    pub async fn call_with<F, Fut>(&self, key: &str, fetcher: F, admission: Admission) -> Result<Served<V>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let primary = self
            .bulkhead
            .execute_with(
                || {
                    self.breaker.execute(|| {
                        RetryExecutor::run(&self.name, || self.attempt(key, &fetcher), &self.retry)
                    })
                },
                admission,
            )
            .await;

        let err = match primary {
            Ok((value, freshness)) => {
                return Ok(Served {
                    value,
                    served_by: ServedBy::Primary(freshness),
                })
            }
            Err(err) => err,
        };

        let chain = match &self.fallback {
            Some(chain) if chain.len(key) > 0 => chain,
            _ => return Err(err),
        };

        tracing::warn!(
            pipeline = %self.name,
            key = %key,
            error = %err,
            "Primary path failed, resolving fallbacks"
        );
        let resolution = chain.resolve(key).await?;
        Ok(Served {
            value: resolution.value,
            served_by: ServedBy::Fallback {
                priority: resolution.priority,
            },
        })
    }

    async fn attempt<F, Fut>(&self, key: &str, fetcher: &F) -> Result<(V, Freshness)>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        match &self.cache {
            Some(cache) => {
                let cached = cache.get(key, fetcher, self.cache_ttl).await?;
                Ok((cached.value, cached.freshness))
            }
            None => Ok((fetcher().await?, Freshness::Fetched)),
        }
    }
}

impl<V> std::fmt::Debug for Pipeline<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("bulkhead", &self.bulkhead)
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .field("cached", &self.cache.is_some())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
