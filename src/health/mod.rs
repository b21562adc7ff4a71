//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! register_check(name, check)
//!
//! run_checks():
//!     → every check concurrently, each under check_timeout
//!     → HealthReport { healthy = AND of all, checks }
//!
//! run(interval, shutdown):
//!     Periodic timer
//!     → run_checks()
//!     → log failing checks, update health gauge
//! ```
//!
//! # Design Decisions
//! - No caching: every report is a fresh evaluation
//! - A timed-out or erroring check is unhealthy, never fatal to the report

pub mod monitor;

pub use monitor::{HealthCheckResult, HealthMonitor, HealthReport};
