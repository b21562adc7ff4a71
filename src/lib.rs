//! Resilience toolkit for calls to unreliable resources.
//!
//! Circuit breaker, retries with backoff, bulkhead, cache-aside with
//! stale-on-error, fallback chains and aggregated health checks, each usable
//! on its own or composed through [`resilience::Pipeline`].

// Protection components
pub mod cache;
pub mod health;
pub mod resilience;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use cache::{CacheAside, Cached, Freshness};
pub use config::ToolkitConfig;
pub use error::{BoxError, ResilienceError, Result};
pub use health::{HealthMonitor, HealthReport};
pub use lifecycle::Shutdown;
pub use resilience::{
    Admission, Bulkhead, CircuitBreaker, CircuitState, FallbackChain, Pipeline, ResilienceRegistry,
    RetryExecutor, RetryPolicy,
};
