//! Aggregated health checks.
//!
//! # Responsibilities
//! - Hold named async checks
//! - Evaluate all of them concurrently with a per-check timeout
//! - Periodically publish results to logs and metrics

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::config::HealthConfig;
use crate::error::BoxError;
use crate::observability::metrics;

type Check = Arc<dyn Fn() -> BoxFuture<'static, Result<bool, BoxError>> + Send + Sync>;

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Outcome of a full evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// True when every check passed (vacuously true with no checks).
    pub healthy: bool,
    pub checks: Vec<HealthCheckResult>,
}

impl HealthReport {
    pub fn failing(&self) -> impl Iterator<Item = &HealthCheckResult> {
        self.checks.iter().filter(|c| !c.healthy)
    }
}

pub struct HealthMonitor {
    config: HealthConfig,
    checks: Mutex<Vec<(String, Check)>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            checks: Mutex::new(Vec::new()),
        }
    }

    /// Register `check` under `name`, replacing any check with that name.
    pub fn register_check<F, Fut>(&self, name: impl Into<String>, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        let name = name.into();
        let check: Check = Arc::new(move || check().boxed());

        let mut checks = self.checks.lock().expect("health checks mutex poisoned");
        match checks.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = check,
            None => checks.push((name, check)),
        }
    }

    /// Remove the check named `name`. Returns whether it existed.
    pub fn unregister_check(&self, name: &str) -> bool {
        let mut checks = self.checks.lock().expect("health checks mutex poisoned");
        let before = checks.len();
        checks.retain(|(existing, _)| existing != name);
        checks.len() != before
    }

    pub fn check_names(&self) -> Vec<String> {
        self.checks
            .lock()
            .expect("health checks mutex poisoned")
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Evaluate every registered check concurrently.
    pub async fn run_checks(&self) -> HealthReport {
        let checks: Vec<(String, Check)> = self
            .checks
            .lock()
            .expect("health checks mutex poisoned")
            .clone();
        let timeout = self.config.check_timeout();

        let results = join_all(
            checks
                .into_iter()
                .map(|(name, check)| evaluate(name, check, timeout)),
        )
        .await;

        HealthReport {
            healthy: results.iter().all(|r| r.healthy),
            checks: results,
        }
    }

    /// Run checks every `interval` until `shutdown` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            checks = self.check_names().len(),
            "Health monitor starting"
        );

        let mut ticker = time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_checks().await;
                    for check in &report.checks {
                        metrics::record_health_check(&check.name, check.healthy);
                    }
                    if report.healthy {
                        tracing::debug!(checks = report.checks.len(), "All health checks passed");
                    } else {
                        let failing: Vec<&str> = report.failing().map(|c| c.name.as_str()).collect();
                        tracing::warn!(failing = ?failing, "Health checks failing");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

async fn evaluate(name: String, check: Check, timeout: Duration) -> HealthCheckResult {
    let start = Instant::now();
    // A panicking check is a failed check, not a missing report.
    let guarded = AssertUnwindSafe(async move { check().await }).catch_unwind();
    let outcome = time::timeout(timeout, guarded).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let (healthy, error) = match outcome {
        Ok(Ok(Ok(healthy))) => (healthy, None),
        Ok(Ok(Err(e))) => {
            tracing::warn!(check = %name, error = %e, "Health check failed");
            (false, Some(e.to_string()))
        }
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(check = %name, panic = %message, "Health check panicked");
            (false, Some(format!("check panicked: {message}")))
        }
        Err(_) => {
            tracing::warn!(check = %name, timeout_ms = timeout.as_millis() as u64, "Health check timed out");
            (false, Some(format!("timed out after {}ms", timeout.as_millis())))
        }
    };

    HealthCheckResult {
        name,
        healthy,
        error,
        duration_ms,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}
