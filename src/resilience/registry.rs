//! Named resilience components built from configuration.
//!
//! Callers hold a `ResilienceRegistry` (usually in an `Arc`) and ask it for
//! the breaker or bulkhead of a named resource. The first request creates the
//! component from the current configuration; later requests share it.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use super::bulkhead::Bulkhead;
use super::circuit_breaker::{CircuitBreaker, CircuitState};
use super::retries::RetryPolicy;
use crate::config::ToolkitConfig;

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
}

/// Point-in-time view of one bulkhead.
#[derive(Debug, Clone, Serialize)]
pub struct BulkheadStatus {
    pub name: String,
    pub in_flight: usize,
    pub queued: usize,
    pub max_concurrent: usize,
}

/// Registry of per-resource breakers and bulkheads.
pub struct ResilienceRegistry {
    config: ArcSwap<ToolkitConfig>,
    breakers: DashMap<String, CircuitBreaker>,
    bulkheads: DashMap<String, Bulkhead>,
}

impl ResilienceRegistry {
    pub fn new(config: ToolkitConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            breakers: DashMap::new(),
            bulkheads: DashMap::new(),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> Arc<ToolkitConfig> {
        self.config.load_full()
    }

    /// Replace the configuration used for components created from now on.
    ///
    /// Existing breakers and bulkheads keep the configuration they were
    /// created with.
    pub fn reload(&self, config: ToolkitConfig) {
        tracing::info!(
            resources = config.resources.len(),
            existing_breakers = self.breakers.len(),
            existing_bulkheads = self.bulkheads.len(),
            "Resilience configuration reloaded"
        );
        self.config.store(Arc::new(config));
    }

    /// Breaker for `resource`, created on first use.
    pub fn breaker(&self, resource: &str) -> CircuitBreaker {
        if let Some(existing) = self.breakers.get(resource) {
            return existing.value().clone();
        }

        self.breakers
            .entry(resource.to_string())
            .or_insert_with(|| {
                let config = self.config.load().breaker_for(resource);
                tracing::debug!(
                    resource = %resource,
                    failure_threshold = config.failure_threshold,
                    "Circuit breaker registered"
                );
                CircuitBreaker::new(resource, config)
            })
            .value()
            .clone()
    }

    /// Bulkhead for `resource`, created on first use.
    pub fn bulkhead(&self, resource: &str) -> Bulkhead {
        if let Some(existing) = self.bulkheads.get(resource) {
            return existing.value().clone();
        }

        self.bulkheads
            .entry(resource.to_string())
            .or_insert_with(|| {
                let config = self.config.load().bulkhead_for(resource);
                tracing::debug!(
                    resource = %resource,
                    max_concurrent = config.max_concurrent,
                    max_queue = config.max_queue,
                    "Bulkhead registered"
                );
                Bulkhead::new(resource, config)
            })
            .value()
            .clone()
    }

    /// Retry policy for `resource` from the current configuration.
    pub fn retry_policy(&self, resource: &str) -> RetryPolicy {
        RetryPolicy::new(self.config.load().retry_for(resource))
    }

    /// Status of every breaker, sorted by name.
    pub fn breaker_statuses(&self) -> Vec<BreakerStatus> {
        let mut statuses: Vec<BreakerStatus> = self
            .breakers
            .iter()
            .map(|entry| {
                let snapshot = entry.value().snapshot();
                BreakerStatus {
                    name: entry.key().clone(),
                    state: snapshot.state,
                    failure_count: snapshot.failure_count,
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Status of every bulkhead, sorted by name.
    pub fn bulkhead_statuses(&self) -> Vec<BulkheadStatus> {
        let mut statuses: Vec<BulkheadStatus> = self
            .bulkheads
            .iter()
            .map(|entry| {
                let bulkhead = entry.value();
                BulkheadStatus {
                    name: entry.key().clone(),
                    in_flight: bulkhead.current_usage(),
                    queued: bulkhead.queue_length(),
                    max_concurrent: bulkhead.max_concurrent(),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Force every breaker back to Closed.
    pub fn reset_breakers(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }
}

impl Default for ResilienceRegistry {
    fn default() -> Self {
        Self::new(ToolkitConfig::default())
    }
}
