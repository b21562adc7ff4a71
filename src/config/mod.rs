//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ToolkitConfig (validated, immutable)
//!     → ResilienceRegistry builds breakers/bulkheads from it
//!
//! On file change:
//!     watcher.rs detects change, waits for the burst of events to settle
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → unchanged configs are dropped
//!     → ResilienceRegistry::reload swaps the defaults
//!     → resources registered afterwards use the new values
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Per-resource overrides replace a whole section, never merge field-by-field
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BulkheadConfig, CacheConfig, CircuitBreakerConfig, HealthConfig, Jitter, LogFormat,
    ObservabilityConfig, ResourceConfig, RetryConfig, ToolkitConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::{spawn_registry_reload, ConfigWatcher};
