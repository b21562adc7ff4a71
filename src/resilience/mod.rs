//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to an unreliable resource:
//!     → bulkhead.rs (bounded concurrency, FIFO wait queue)
//!     → circuit_breaker.rs (fail fast while the resource is unhealthy)
//!     → retries.rs (retry transient failures with backoff.rs delays)
//!     → cache (serve stale data if the fetch still fails)
//!     → On error: fallback.rs (ordered alternative producers)
//! ```
//!
//! # Design Decisions
//! - Components are independent; pipeline.rs is the only composition
//! - Every stage speaks `ResilienceError`, so stages nest without adapters
//! - Named components live in registry.rs, passed explicitly to call sites

pub mod backoff;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod fallback;
pub mod pipeline;
pub mod registry;
pub mod retries;

pub use bulkhead::{Admission, Bulkhead};
pub use circuit_breaker::{BreakerState, BreakerStore, CircuitBreaker, CircuitState, LocalBreakerStore};
pub use fallback::{FallbackChain, FallbackFailure, Resolution};
pub use pipeline::{Pipeline, Served, ServedBy};
pub use registry::{BreakerStatus, BulkheadStatus, ResilienceRegistry};
pub use retries::{Classifier, RetryExecutor, RetryPolicy};
