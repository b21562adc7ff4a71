//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → every subscribed background loop exits
//!     (cache sweeper, health monitor, CLI watch loop)
//!
//! Signals (signals.rs):
//!     Ctrl+C → wait_for_shutdown_signal() returns → trigger()
//! ```
//!
//! # Design Decisions
//! - Background loops subscribe before they are spawned, so no signal is missed
//! - Shutdown only stops loops; in-flight calls finish on their own

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_shutdown_signal;
