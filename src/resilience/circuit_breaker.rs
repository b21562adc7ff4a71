//! Circuit breaker for resource protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: resource assumed down, calls fail fast
//! - HalfOpen: trial calls test whether the resource recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → HalfOpen: first call after reset_timeout elapsed
//! HalfOpen → Closed: success_count >= half_open_max_calls
//! HalfOpen → Open: any trial call fails
//! ```
//!
//! # Design Decisions
//! - Per-resource circuit breaker (not global)
//! - Fail fast in Open state (no waiting, `f` never invoked)
//! - Any error counts as a failure; the breaker does not inspect content
//! - A success in Closed resets the failure count fully (no decay)
//! - Outcomes arriving while Open are ignored
//! - Every check-and-act runs inside one `BreakerStore::transact` call

use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::{ResilienceError, Result};
use crate::observability::metrics;
use crate::resilience::backoff::deadline_after;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn code(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

/// Mutable breaker state. One per protected resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<Instant>,
    pub next_attempt_time: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            next_attempt_time: None,
        }
    }
}

impl BreakerState {
    /// Decide whether a call may proceed at `now`.
    ///
    /// Returns the remaining wait when the circuit is open.
    fn acquire(&mut self, now: Instant) -> std::result::Result<Option<Transition>, Duration> {
        if self.state != CircuitState::Open {
            return Ok(None);
        }
        match self.next_attempt_time {
            Some(next) if now < next => Err(next - now),
            _ => Ok(Some(self.transition(CircuitState::HalfOpen))),
        }
    }

    fn record_success(&mut self, config: &CircuitBreakerConfig) -> Option<Transition> {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= config.half_open_max_calls {
                    Some(self.transition(CircuitState::Closed))
                } else {
                    None
                }
            }
            CircuitState::Open => None,
        }
    }

    fn record_failure(&mut self, config: &CircuitBreakerConfig, now: Instant) -> Option<Transition> {
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                self.last_failure_time = Some(now);
                if self.failure_count >= config.failure_threshold {
                    Some(self.open(config, now))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                self.last_failure_time = Some(now);
                Some(self.open(config, now))
            }
            CircuitState::Open => None,
        }
    }

    fn open(&mut self, config: &CircuitBreakerConfig, now: Instant) -> Transition {
        let transition = self.transition(CircuitState::Open);
        self.next_attempt_time = Some(deadline_after(now, config.reset_timeout()));
        transition
    }

    /// Move to `to`, zeroing counters.
    fn transition(&mut self, to: CircuitState) -> Transition {
        let from = self.state;
        self.state = to;
        self.failure_count = 0;
        self.success_count = 0;
        if to != CircuitState::Open {
            self.next_attempt_time = None;
        }
        Transition { from, to }
    }
}

/// Storage for breaker state.
///
/// `transact` must run the closure with exclusive access to the state.
pub trait BreakerStore: Send + Sync {
    fn transact(&self, f: &mut dyn FnMut(&mut BreakerState));
}

/// In-process breaker state guarded by a mutex.
#[derive(Debug, Default)]
pub struct LocalBreakerStore {
    state: Mutex<BreakerState>,
}

impl LocalBreakerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BreakerStore for LocalBreakerStore {
    fn transact(&self, f: &mut dyn FnMut(&mut BreakerState)) {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        f(&mut state);
    }
}

/// Circuit breaker protecting a single named resource.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    store: Arc<dyn BreakerStore>,
}

impl CircuitBreaker {
    /// Create a breaker with in-process state.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_store(name, config, Arc::new(LocalBreakerStore::new()))
    }

    /// Create a breaker backed by a custom state store.
    pub fn with_store(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        store: Arc<dyn BreakerStore>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation through the circuit breaker.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.try_acquire()?;

        let result = operation().await;

        match &result {
            Ok(_) => self.on_success(),
            Err(err) => self.on_failure(err),
        }

        result
    }

    /// Current state. Does not advance Open → HalfOpen; only a call does.
    pub fn state(&self) -> CircuitState {
        self.snapshot().state
    }

    /// Copy of the full breaker state.
    pub fn snapshot(&self) -> BreakerState {
        let mut snapshot = BreakerState::default();
        self.store.transact(&mut |state| snapshot = state.clone());
        snapshot
    }

    /// Force the breaker back to Closed.
    pub fn reset(&self) {
        let mut transition = None;
        self.store.transact(&mut |state| {
            if state.state != CircuitState::Closed {
                transition = Some(state.transition(CircuitState::Closed));
            } else {
                state.failure_count = 0;
            }
        });
        if let Some(t) = transition {
            self.report(t);
        }
    }

    fn try_acquire(&self) -> Result<()> {
        let now = Instant::now();
        let mut outcome = Ok(None);
        self.store.transact(&mut |state| outcome = state.acquire(now));

        match outcome {
            Ok(Some(t)) => {
                self.report(t);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(retry_after) => {
                tracing::debug!(
                    resource = %self.name,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Circuit open, rejecting call"
                );
                metrics::record_breaker_rejection(&self.name);
                Err(ResilienceError::CircuitOpen {
                    resource: self.name.clone(),
                    retry_after,
                })
            }
        }
    }

    fn on_success(&self) {
        let mut transition = None;
        self.store
            .transact(&mut |state| transition = state.record_success(&self.config));
        if let Some(t) = transition {
            self.report(t);
        }
    }

    fn on_failure(&self, err: &ResilienceError) {
        let now = Instant::now();
        let mut transition = None;
        let mut failures = 0;
        self.store.transact(&mut |state| {
            transition = state.record_failure(&self.config, now);
            failures = state.failure_count;
        });

        match transition {
            Some(t) => self.report(t),
            None => tracing::debug!(
                resource = %self.name,
                failures,
                threshold = self.config.failure_threshold,
                error = %err,
                "Circuit breaker recorded failure"
            ),
        }
    }

    fn report(&self, t: Transition) {
        match t.to {
            CircuitState::Open => tracing::warn!(
                resource = %self.name,
                from = t.from.as_str(),
                reset_timeout_ms = self.config.reset_timeout_ms,
                "Circuit breaker tripped"
            ),
            CircuitState::HalfOpen => tracing::info!(
                resource = %self.name,
                "Circuit breaker half-open, allowing trial call"
            ),
            CircuitState::Closed => tracing::info!(
                resource = %self.name,
                from = t.from.as_str(),
                "Circuit breaker reset to closed"
            ),
        }
        metrics::record_breaker_transition(&self.name, t.to.as_str(), t.to.code());
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}
