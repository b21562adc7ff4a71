//! Cache-aside layer.
//!
//! # Data Flow
//! ```text
//! CacheAside::get(key, fetcher)
//!     → store.rs (CacheStore lookup)
//!     → fetcher on miss or expiry
//!     → stale entry if the fetcher fails
//!
//! Background:
//!     spawn_sweeper → sweep() every sweep_interval
//! ```

pub mod aside;
pub mod store;

pub use aside::{CacheAside, CacheStats, Cached, Freshness};
pub use store::{CacheEntry, CacheStore, LocalStore};
