//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the toolkit.
//! All types derive Serde traits for deserialization from config files.
//! Durations are stored as integer milliseconds or seconds so TOML stays flat.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration for the resilience toolkit.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ToolkitConfig {
    /// Default circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Default retry settings.
    pub retry: RetryConfig,

    /// Default bulkhead settings.
    pub bulkhead: BulkheadConfig,

    /// Cache-aside settings.
    pub cache: CacheConfig,

    /// Health monitor settings.
    pub health: HealthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Per-resource overrides keyed by resource name.
    pub resources: HashMap<String, ResourceConfig>,
}

impl ToolkitConfig {
    /// Effective breaker config for a resource (override or default).
    pub fn breaker_for(&self, resource: &str) -> CircuitBreakerConfig {
        self.resources
            .get(resource)
            .and_then(|r| r.circuit_breaker.clone())
            .unwrap_or_else(|| self.circuit_breaker.clone())
    }

    /// Effective bulkhead config for a resource (override or default).
    pub fn bulkhead_for(&self, resource: &str) -> BulkheadConfig {
        self.resources
            .get(resource)
            .and_then(|r| r.bulkhead.clone())
            .unwrap_or_else(|| self.bulkhead.clone())
    }

    /// Effective retry config for a resource (override or default).
    pub fn retry_for(&self, resource: &str) -> RetryConfig {
        self.resources
            .get(resource)
            .and_then(|r| r.retry.clone())
            .unwrap_or_else(|| self.retry.clone())
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before the circuit opens.
    pub failure_threshold: u32,

    /// Time the circuit stays Open before a trial call, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Successful trial calls needed in HalfOpen to close the circuit.
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            half_open_max_calls: 3,
        }
    }
}

/// Jitter applied to retry backoff delays.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Jitter {
    /// Use the computed delay unchanged.
    None,
    /// Uniform in `[0, delay]`.
    #[default]
    Full,
    /// Uniform in `[delay / 2, delay]`.
    Equal,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,

    /// Randomization strategy for delays.
    pub jitter: Jitter,
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: Jitter::Full,
        }
    }
}

/// Bulkhead configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BulkheadConfig {
    /// Maximum operations in flight at once.
    pub max_concurrent: usize,

    /// Maximum callers waiting for a slot before new ones are rejected.
    pub max_queue: usize,

    /// Optional bound on how long a caller waits for a slot, in milliseconds.
    pub max_wait_ms: Option<u64>,
}

impl BulkheadConfig {
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_queue: 100,
            max_wait_ms: None,
        }
    }
}

/// Cache-aside configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL used when callers do not pass one, in seconds.
    pub default_ttl_secs: u64,

    /// Interval between expired-entry sweeps, in seconds.
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

/// Health monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between periodic evaluations in seconds.
    pub interval_secs: u64,

    /// Per-check timeout in milliseconds.
    pub check_timeout_ms: u64,
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            check_timeout_ms: 5_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Per-resource overrides. Missing sections fall back to the defaults.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ResourceConfig {
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub retry: Option<RetryConfig>,
    pub bulkhead: Option<BulkheadConfig>,
}
