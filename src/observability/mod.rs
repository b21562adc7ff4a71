//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every component produces:
//!     → tracing events (breaker trips/resets, retries, fallbacks, cache hits/misses/stale serves)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers (installed by the embedding application or the CLI):
//!     → logging.rs (tracing-subscriber, pretty/compact/json)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Components only talk to the `tracing` and `metrics` facades
//! - Without an installed subscriber/recorder every call is a no-op
//! - Events are advisory; they never influence control flow

pub mod logging;
pub mod metrics;
