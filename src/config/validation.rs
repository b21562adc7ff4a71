//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, delays ordered)
//! - Validate per-resource overrides with the same rules
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ToolkitConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{
    BulkheadConfig, CircuitBreakerConfig, RetryConfig, ToolkitConfig,
};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &ToolkitConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_breaker("circuit_breaker", &config.circuit_breaker, &mut errors);
    check_retry("retry", &config.retry, &mut errors);
    check_bulkhead("bulkhead", &config.bulkhead, &mut errors);

    if config.cache.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("cache.sweep_interval_secs", "must be greater than 0"));
    }
    if config.health.interval_secs == 0 {
        errors.push(ValidationError::new("health.interval_secs", "must be greater than 0"));
    }
    if config.health.check_timeout_ms == 0 {
        errors.push(ValidationError::new("health.check_timeout_ms", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    // Sorted so error output is stable across HashMap iteration order.
    let mut names: Vec<&String> = config.resources.keys().collect();
    names.sort();
    for name in names {
        let resource = &config.resources[name];
        if let Some(breaker) = &resource.circuit_breaker {
            check_breaker(&format!("resources.{name}.circuit_breaker"), breaker, &mut errors);
        }
        if let Some(retry) = &resource.retry {
            check_retry(&format!("resources.{name}.retry"), retry, &mut errors);
        }
        if let Some(bulkhead) = &resource.bulkhead {
            check_bulkhead(&format!("resources.{name}.bulkhead"), bulkhead, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_breaker(prefix: &str, config: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if config.failure_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{prefix}.failure_threshold"),
            "must be greater than 0",
        ));
    }
    if config.half_open_max_calls == 0 {
        errors.push(ValidationError::new(
            format!("{prefix}.half_open_max_calls"),
            "must be greater than 0",
        ));
    }
}

fn check_retry(prefix: &str, config: &RetryConfig, errors: &mut Vec<ValidationError>) {
    if config.max_attempts == 0 {
        errors.push(ValidationError::new(
            format!("{prefix}.max_attempts"),
            "must be greater than 0",
        ));
    }
    if !config.backoff_multiplier.is_finite() || config.backoff_multiplier < 1.0 {
        errors.push(ValidationError::new(
            format!("{prefix}.backoff_multiplier"),
            "must be a finite number >= 1.0",
        ));
    }
    if config.initial_delay_ms > config.max_delay_ms {
        errors.push(ValidationError::new(
            format!("{prefix}.initial_delay_ms"),
            "must not exceed max_delay_ms",
        ));
    }
}

fn check_bulkhead(prefix: &str, config: &BulkheadConfig, errors: &mut Vec<ValidationError>) {
    if config.max_concurrent == 0 {
        errors.push(ValidationError::new(
            format!("{prefix}.max_concurrent"),
            "must be greater than 0",
        ));
    }
    if config.max_wait_ms == Some(0) {
        errors.push(ValidationError::new(
            format!("{prefix}.max_wait_ms"),
            "must be greater than 0 when set",
        ));
    }
}
