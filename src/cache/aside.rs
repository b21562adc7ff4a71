//! Cache-aside with stale-on-error fallback.
//!
//! # Read Path
//! ```text
//! get(key)
//!     → pin key (sweeper skips pinned keys)
//!     → fresh entry?  → Hit
//!     → fetcher Ok    → store, Fetched
//!     → fetcher Err   → any entry? → Stale (warn)
//!                                  → propagate error
//! ```
//!
//! # Design Decisions
//! - Expiry is lazy: nothing is refreshed behind the caller's back
//! - Expired entries stay until swept so they can back a failed fetch
//! - Concurrent misses for one key each call the fetcher (no coalescing)

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use super::store::{CacheEntry, CacheStore, LocalStore};
use crate::config::CacheConfig;
use crate::error::{ResilienceError, Result};
use crate::observability::metrics;
use crate::resilience::backoff::deadline_after;

/// Where a value returned by [`CacheAside::get`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Served from a live entry.
    Hit,
    /// Fetched from the source just now.
    Fetched,
    /// Fetch failed; served from an old entry.
    Stale,
}

/// A value plus how fresh it is.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<V> {
    pub value: V,
    pub freshness: Freshness,
}

impl<V> Cached<V> {
    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }

    pub fn into_value(self) -> V {
        self.value
    }
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_served: u64,
    pub fetch_errors: u64,
    pub entries: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_served: AtomicU64,
    fetch_errors: AtomicU64,
}

type Fetcher<V> = Arc<dyn Fn() -> BoxFuture<'static, Result<V>> + Send + Sync>;

struct RegisteredFetcher<V> {
    fetcher: Fetcher<V>,
    ttl: Option<Duration>,
}

/// Marks a key as having a fetch in flight until dropped.
struct FetchPin<'a> {
    in_flight: &'a Mutex<HashMap<String, usize>>,
    key: String,
}

impl Drop for FetchPin<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().expect("cache pin mutex poisoned");
        if let Some(count) = in_flight.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                in_flight.remove(&self.key);
            }
        }
    }
}

/// TTL cache that falls back to expired data when the source fails.
pub struct CacheAside<V> {
    name: String,
    config: CacheConfig,
    store: Arc<dyn CacheStore<V>>,
    in_flight: Mutex<HashMap<String, usize>>,
    fetchers: Mutex<HashMap<String, RegisteredFetcher<V>>>,
    counters: Counters,
}

impl<V: Clone + Send + Sync + 'static> CacheAside<V> {
    /// Create a cache with in-process storage.
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        Self::with_store(name, config, Arc::new(LocalStore::new()))
    }

    /// Create a cache backed by a custom store.
    pub fn with_store(
        name: impl Into<String>,
        config: CacheConfig,
        store: Arc<dyn CacheStore<V>>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            store,
            in_flight: Mutex::new(HashMap::new()),
            fetchers: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl()
    }

    /// Return the cached value for `key`, calling `fetcher` on a miss.
    ///
    /// `ttl` of `None` uses the configured default.
    pub async fn get<F, Fut>(&self, key: &str, fetcher: F, ttl: Option<Duration>) -> Result<Cached<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let _pin = self.pin(key);

        if let Some(entry) = self.store.get(key) {
            if entry.is_fresh(Instant::now()) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_event(&self.name, "hit");
                tracing::trace!(cache = %self.name, key = %key, "Cache hit");
                return Ok(Cached {
                    value: entry.value,
                    freshness: Freshness::Hit,
                });
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_event(&self.name, "miss");
        tracing::trace!(cache = %self.name, key = %key, "Cache miss, fetching");

        match fetcher().await {
            Ok(value) => {
                self.store_value(key, value.clone(), ttl);
                Ok(Cached {
                    value,
                    freshness: Freshness::Fetched,
                })
            }
            Err(err) => {
                self.counters.fetch_errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_event(&self.name, "fetch_error");
                match self.store.get(key) {
                    Some(entry) => {
                        self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
                        metrics::record_cache_event(&self.name, "stale");
                        tracing::warn!(
                            cache = %self.name,
                            key = %key,
                            error = %err,
                            "Fetch failed, serving stale entry"
                        );
                        Ok(Cached {
                            value: entry.value,
                            freshness: Freshness::Stale,
                        })
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Store `value` unconditionally.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.store_value(key, value, ttl);
    }

    /// Drop `key`. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.store.remove(key);
        if removed {
            tracing::debug!(cache = %self.name, key = %key, "Entry invalidated");
            self.record_size();
        }
        removed
    }

    /// Drop every key matching `pattern`. Returns how many were removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        let re = Regex::new(pattern)?;
        let removed = self.store.retain(&mut |key, _| !re.is_match(key));
        tracing::debug!(cache = %self.name, pattern = %pattern, removed, "Pattern invalidated");
        self.record_size();
        Ok(removed)
    }

    /// Remove expired entries that have no fetch in flight.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let in_flight = self.in_flight.lock().expect("cache pin mutex poisoned");
        let removed = self
            .store
            .retain(&mut |key, entry| entry.expires_at >= now || in_flight.contains_key(key));
        drop(in_flight);

        if removed > 0 {
            tracing::debug!(cache = %self.name, removed, "Swept expired entries");
            metrics::record_cache_event(&self.name, "evicted");
        }
        self.record_size();
        removed
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.sweep();
                    }
                    _ = shutdown.recv() => {
                        tracing::info!(cache = %cache.name, "Cache sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }

    /// Remember how to load `key` so [`refresh`](Self::refresh) can reload it.
    pub fn register_fetcher<F, Fut>(&self, key: impl Into<String>, fetcher: F, ttl: Option<Duration>)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let registered = RegisteredFetcher {
            fetcher: Arc::new(move || fetcher().boxed()),
            ttl,
        };
        self.fetchers
            .lock()
            .expect("cache fetchers mutex poisoned")
            .insert(key.into(), registered);
    }

    /// Re-fetch `key` with its registered fetcher and store the result.
    pub async fn refresh(&self, key: &str) -> Result<V> {
        let (fetcher, ttl) = {
            let fetchers = self.fetchers.lock().expect("cache fetchers mutex poisoned");
            let registered = fetchers.get(key).ok_or_else(|| ResilienceError::NoFetcher {
                key: key.to_string(),
            })?;
            (registered.fetcher.clone(), registered.ttl)
        };

        let _pin = self.pin(key);
        match fetcher().await {
            Ok(value) => {
                self.store_value(key, value.clone(), ttl);
                metrics::record_cache_event(&self.name, "refresh");
                Ok(value)
            }
            Err(err) => {
                self.counters.fetch_errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_event(&self.name, "fetch_error");
                tracing::warn!(cache = %self.name, key = %key, error = %err, "Refresh failed");
                Err(err)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stale_served: self.counters.stale_served.load(Ordering::Relaxed),
            fetch_errors: self.counters.fetch_errors.load(Ordering::Relaxed),
            entries: self.store.len(),
        }
    }

    fn store_value(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        self.store.put(
            key,
            CacheEntry {
                value,
                expires_at: deadline_after(Instant::now(), ttl),
            },
        );
        self.record_size();
    }

    fn pin(&self, key: &str) -> FetchPin<'_> {
        *self
            .in_flight
            .lock()
            .expect("cache pin mutex poisoned")
            .entry(key.to_string())
            .or_insert(0) += 1;
        FetchPin {
            in_flight: &self.in_flight,
            key: key.to_string(),
        }
    }

    fn record_size(&self) {
        metrics::record_cache_size(&self.name, self.store.len());
    }
}

impl<V> std::fmt::Debug for CacheAside<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAside")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
