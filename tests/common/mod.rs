//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use resilience_kit::config::{
    BulkheadConfig, CacheConfig, CircuitBreakerConfig, Jitter, RetryConfig, ToolkitConfig,
};
use resilience_kit::error::{ResilienceError, Result};

/// Simulated upstream that fails a fixed number of times, then succeeds.
#[derive(Clone)]
pub struct FlakyUpstream {
    calls: Arc<AtomicU32>,
    failures: u32,
    permanent: bool,
}

impl FlakyUpstream {
    /// Fails the first `failures` calls with a transient error.
    pub fn failing_first(failures: u32) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            failures,
            permanent: false,
        }
    }

    /// Never succeeds.
    pub fn always_failing() -> Self {
        Self::failing_first(u32::MAX)
    }

    /// Failures are permanent instead of transient.
    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub async fn call(&self) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            if self.permanent {
                Err(ResilienceError::permanent(format!("rejected call {n}")))
            } else {
                Err(ResilienceError::transient(format!("unavailable on call {n}")))
            }
        } else {
            Ok(format!("ok on call {n}"))
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Tracks how many operations run at once.
#[derive(Clone, Default)]
pub struct ConcurrencyProbe {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    /// Hold a slot for `hold`, recording the peak concurrency.
    pub async fn run(&self, hold: Duration) -> Result<()> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(hold).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Config with fast, deterministic timings.
pub fn fast_config() -> ToolkitConfig {
    ToolkitConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout_ms: 1_000,
            half_open_max_calls: 2,
        },
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 100,
            backoff_multiplier: 2.0,
            jitter: Jitter::None,
        },
        bulkhead: BulkheadConfig {
            max_concurrent: 2,
            max_queue: 2,
            max_wait_ms: None,
        },
        cache: CacheConfig {
            default_ttl_secs: 1,
            sweep_interval_secs: 60,
        },
        ..Default::default()
    }
}
