//! Bulkhead: bounded-concurrency admission gate.
//!
//! # Responsibilities
//! - Limit operations in flight to a fixed `max`
//! - Queue excess callers FIFO up to `max_queue`, reject beyond that
//! - Let queued callers give up via cancellation token or deadline
//!
//! # Design Decisions
//! - Slots are handed directly from a finishing operation to the head waiter,
//!   so `current` never dips below `max` while anyone is queued
//! - Release is tied to an RAII permit: success, error, panic and drop all free the slot
//! - Admission and release each run inside one mutex section (no `.await` held)
//! - Content-agnostic: errors from the operation pass through untouched

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::BulkheadConfig;
use crate::error::{ResilienceError, Result};
use crate::observability::metrics;
use crate::resilience::backoff::deadline_after;

/// Per-call options for waiting on a slot.
#[derive(Debug, Clone, Default)]
pub struct Admission {
    /// Abandon the wait when this token is cancelled.
    pub cancel: Option<CancellationToken>,
    /// Abandon the wait at this instant.
    pub deadline: Option<Instant>,
}

impl Admission {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(deadline_after(Instant::now(), timeout))
    }
}

struct Waiter {
    id: u64,
    grant: oneshot::Sender<()>,
}

#[derive(Default)]
struct BulkheadState {
    current: usize,
    queue: VecDeque<Waiter>,
    next_id: u64,
}

struct Inner {
    name: String,
    max: usize,
    max_queue: usize,
    max_wait: Option<Duration>,
    state: Mutex<BulkheadState>,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, BulkheadState> {
        self.state.lock().expect("bulkhead mutex poisoned")
    }

    /// Hand the slot to the first live waiter, or free it.
    fn release(&self) {
        let mut state = self.lock();
        while let Some(waiter) = state.queue.pop_front() {
            if waiter.grant.send(()).is_ok() {
                tracing::trace!(bulkhead = %self.name, waiter = waiter.id, "Slot handed to queued caller");
                metrics::record_bulkhead_usage(&self.name, state.current, state.queue.len());
                return;
            }
        }
        state.current -= 1;
        metrics::record_bulkhead_usage(&self.name, state.current, state.queue.len());
    }
}

/// A held slot. Dropping it releases the slot.
struct Permit {
    inner: Arc<Inner>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.inner.release();
    }
}

/// Tracks a queued caller; leaves the queue cleanly however the wait ends.
struct WaitGuard {
    inner: Arc<Inner>,
    id: u64,
    rx: oneshot::Receiver<()>,
    settled: bool,
}

impl WaitGuard {
    fn into_permit(mut self) -> Permit {
        self.settled = true;
        Permit {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let still_queued = {
            let mut state = self.inner.lock();
            match state.queue.iter().position(|w| w.id == self.id) {
                Some(pos) => {
                    state.queue.remove(pos);
                    metrics::record_bulkhead_usage(&self.inner.name, state.current, state.queue.len());
                    true
                }
                None => false,
            }
        };

        // Grants are sent under the lock, so absence from the queue means a
        // slot was handed to us; pass it on.
        if !still_queued {
            self.inner.release();
        }
    }
}

/// Bounded-concurrency gate with a FIFO wait queue.
#[derive(Clone)]
pub struct Bulkhead {
    inner: Arc<Inner>,
}

impl Bulkhead {
    /// Create a bulkhead allowing `max_concurrent` operations at once.
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                max: config.max_concurrent.max(1),
                max_queue: config.max_queue,
                max_wait: config.max_wait(),
                state: Mutex::new(BulkheadState::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max
    }

    /// Operations currently holding a slot.
    pub fn current_usage(&self) -> usize {
        self.inner.lock().current
    }

    /// Callers waiting for a slot.
    pub fn queue_length(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Run `operation` once a slot is available.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with(operation, Admission::default()).await
    }

    /// Run `operation` once a slot is available, honoring `admission`.
    pub async fn execute_with<F, Fut, T>(&self, operation: F, admission: Admission) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self.acquire(admission).await?;
        operation().await
    }

    async fn acquire(&self, admission: Admission) -> Result<Permit> {
        let name = &self.inner.name;

        // Checked before the free-slot path: a caller that already gave up never takes a slot.
        if admission.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            metrics::record_bulkhead_rejection(name, "cancelled");
            return Err(ResilienceError::BulkheadCancelled { name: name.clone() });
        }

        let mut guard = {
            let mut state = self.inner.lock();
            if state.current < self.inner.max {
                state.current += 1;
                metrics::record_bulkhead_usage(name, state.current, state.queue.len());
                return Ok(Permit {
                    inner: self.inner.clone(),
                });
            }

            if state.queue.len() >= self.inner.max_queue {
                tracing::warn!(
                    bulkhead = %name,
                    in_flight = state.current,
                    queued = state.queue.len(),
                    "Bulkhead full, rejecting call"
                );
                metrics::record_bulkhead_rejection(name, "full");
                return Err(ResilienceError::BulkheadFull {
                    name: name.clone(),
                    max_queue: self.inner.max_queue,
                });
            }

            let id = state.next_id;
            state.next_id += 1;
            let (grant, rx) = oneshot::channel();
            state.queue.push_back(Waiter { id, grant });
            tracing::debug!(bulkhead = %name, queued = state.queue.len(), "Bulkhead at capacity, queueing call");
            metrics::record_bulkhead_usage(name, state.current, state.queue.len());

            WaitGuard {
                inner: self.inner.clone(),
                id,
                rx,
                settled: false,
            }
        };

        let started = Instant::now();
        let deadline = match (admission.deadline, self.inner.max_wait) {
            (Some(d), Some(w)) => Some(d.min(deadline_after(started, w))),
            (Some(d), None) => Some(d),
            (None, Some(w)) => Some(deadline_after(started, w)),
            (None, None) => None,
        };

        let cancelled = async {
            match &admission.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let timed_out = async {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancelled => {
                tracing::debug!(bulkhead = %name, "Queued call cancelled");
                metrics::record_bulkhead_rejection(name, "cancelled");
                Err(ResilienceError::BulkheadCancelled { name: name.clone() })
            }
            granted = &mut guard.rx => granted.map_err(|_| {
                ResilienceError::BulkheadCancelled { name: name.clone() }
            }),
            _ = timed_out => {
                let waited = started.elapsed();
                tracing::debug!(bulkhead = %name, waited_ms = waited.as_millis() as u64, "Queued call timed out");
                metrics::record_bulkhead_rejection(name, "timeout");
                Err(ResilienceError::BulkheadTimeout { name: name.clone(), waited })
            }
        };

        match outcome {
            Ok(()) => Ok(guard.into_permit()),
            Err(err) => {
                if matches!(guard.rx.try_recv(), Err(oneshot::error::TryRecvError::Closed)) {
                    // Dropped from the queue without a grant; nothing to hand back.
                    guard.settled = true;
                }
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Bulkhead")
            .field("name", &self.inner.name)
            .field("max", &self.inner.max)
            .field("current", &state.current)
            .field("queued", &state.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    fn bulkhead(max: usize, max_queue: usize) -> Bulkhead {
        Bulkhead::new(
            "test",
            BulkheadConfig {
                max_concurrent: max,
                max_queue,
                max_wait_ms: None,
            },
        )
    }

    /// Spawn an operation that reports `id` when started and finishes when `done` fires.
    fn spawn_held(
        bh: &Bulkhead,
        id: u32,
        started: mpsc::UnboundedSender<u32>,
    ) -> (oneshot::Sender<()>, JoinHandle<Result<u32>>) {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let bh = bh.clone();
        let handle = tokio::spawn(async move {
            bh.execute(|| async move {
                let _ = started.send(id);
                let _ = done_rx.await;
                Ok(id)
            })
            .await
        });
        (done_tx, handle)
    }

    async fn wait_for_queue(bh: &Bulkhead, len: usize) {
        while bh.queue_length() < len {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_capacity_and_queueing() {
        let bh = bulkhead(2, 10);
        let (tx, mut started) = mpsc::unbounded_channel();

        let (done1, h1) = spawn_held(&bh, 1, tx.clone());
        let (done2, h2) = spawn_held(&bh, 2, tx.clone());
        let (done3, h3) = spawn_held(&bh, 3, tx.clone());

        let mut running = vec![started.recv().await.unwrap(), started.recv().await.unwrap()];
        running.sort();
        assert_eq!(running, vec![1, 2]);
        wait_for_queue(&bh, 1).await;
        assert_eq!(bh.current_usage(), 2);
        assert_eq!(bh.queue_length(), 1);
        assert!(started.try_recv().is_err(), "third operation must wait");

        done1.send(()).unwrap();
        assert_eq!(h1.await.unwrap().unwrap(), 1);
        assert_eq!(started.recv().await.unwrap(), 3);
        assert_eq!(bh.current_usage(), 2);
        assert_eq!(bh.queue_length(), 0);

        done2.send(()).unwrap();
        done3.send(()).unwrap();
        h2.await.unwrap().unwrap();
        h3.await.unwrap().unwrap();
        assert_eq!(bh.current_usage(), 0);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let bh = bulkhead(1, 10);
        let (tx, mut started) = mpsc::unbounded_channel();

        let (done_a, ha) = spawn_held(&bh, 1, tx.clone());
        assert_eq!(started.recv().await.unwrap(), 1);

        let (done_b, hb) = spawn_held(&bh, 2, tx.clone());
        wait_for_queue(&bh, 1).await;
        let (done_c, hc) = spawn_held(&bh, 3, tx.clone());
        wait_for_queue(&bh, 2).await;

        done_a.send(()).unwrap();
        ha.await.unwrap().unwrap();
        assert_eq!(started.recv().await.unwrap(), 2);

        done_b.send(()).unwrap();
        hb.await.unwrap().unwrap();
        assert_eq!(started.recv().await.unwrap(), 3);

        done_c.send(()).unwrap();
        hc.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_rejects_when_queue_full() {
        let bh = bulkhead(1, 1);
        let (tx, mut started) = mpsc::unbounded_channel();

        let (done1, h1) = spawn_held(&bh, 1, tx.clone());
        started.recv().await.unwrap();
        let (done2, h2) = spawn_held(&bh, 2, tx.clone());
        wait_for_queue(&bh, 1).await;

        let err = bh.execute(|| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, ResilienceError::BulkheadFull { max_queue: 1, .. }));

        done1.send(()).unwrap();
        done2.send(()).unwrap();
        h1.await.unwrap().unwrap();
        h2.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failure_releases_slot() {
        let bh = bulkhead(1, 0);
        let err = bh
            .execute(|| async { Err::<(), _>(ResilienceError::permanent("boom")) })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::Permanent(_)));
        assert_eq!(bh.current_usage(), 0);
        assert_eq!(bh.execute(|| async { Ok(5) }).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_cancel_while_queued() {
        let bh = bulkhead(1, 5);
        let (tx, mut started) = mpsc::unbounded_channel();
        let (done1, h1) = spawn_held(&bh, 1, tx);
        started.recv().await.unwrap();

        let token = CancellationToken::new();
        let waiter = {
            let bh = bh.clone();
            let token = token.clone();
            tokio::spawn(async move {
                bh.execute_with(|| async { Ok(()) }, Admission::new().with_cancel(token))
                    .await
            })
        };
        wait_for_queue(&bh, 1).await;

        token.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, ResilienceError::BulkheadCancelled { .. }));
        assert_eq!(bh.queue_length(), 0);

        done1.send(()).unwrap();
        h1.await.unwrap().unwrap();
        assert_eq!(bh.current_usage(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_deadline() {
        let bh = Bulkhead::new(
            "slow",
            BulkheadConfig {
                max_concurrent: 1,
                max_queue: 5,
                max_wait_ms: Some(250),
            },
        );
        let (tx, mut started) = mpsc::unbounded_channel();
        let (done1, h1) = spawn_held(&bh, 1, tx);
        started.recv().await.unwrap();

        let err = bh.execute(|| async { Ok(()) }).await.unwrap_err();
        match err {
            ResilienceError::BulkheadTimeout { waited, .. } => {
                assert_eq!(waited, Duration::from_millis(250));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(bh.queue_length(), 0);

        done1.send(()).unwrap();
        h1.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_waiter_leaves_queue() {
        let bh = bulkhead(1, 5);
        let (tx, mut started) = mpsc::unbounded_channel();
        let (done1, h1) = spawn_held(&bh, 1, tx.clone());
        started.recv().await.unwrap();

        let abandoned = {
            let bh = bh.clone();
            tokio::spawn(async move { bh.execute(|| async { Ok(()) }).await })
        };
        wait_for_queue(&bh, 1).await;
        abandoned.abort();
        let _ = abandoned.await;
        assert_eq!(bh.queue_length(), 0);

        let (done2, h2) = spawn_held(&bh, 2, tx);
        wait_for_queue(&bh, 1).await;
        done1.send(()).unwrap();
        h1.await.unwrap().unwrap();
        assert_eq!(started.recv().await.unwrap(), 2);
        done2.send(()).unwrap();
        h2.await.unwrap().unwrap();
        assert_eq!(bh.current_usage(), 0);
    }

    #[tokio::test]
    async fn test_unbounded_waits_do_not_overflow() {
        let bh = Bulkhead::new(
            "patient",
            BulkheadConfig {
                max_concurrent: 1,
                max_queue: 1,
                max_wait_ms: Some(u64::MAX),
            },
        );
        let (tx, mut started) = mpsc::unbounded_channel();
        let (done1, h1) = spawn_held(&bh, 1, tx);
        started.recv().await.unwrap();

        let waiter = {
            let bh = bh.clone();
            tokio::spawn(async move {
                bh.execute_with(|| async { Ok(2) }, Admission::new().with_timeout(Duration::MAX))
                    .await
            })
        };
        wait_for_queue(&bh, 1).await;

        done1.send(()).unwrap();
        h1.await.unwrap().unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), 2);
        assert_eq!(bh.current_usage(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_token_rejected_with_free_slot() {
        let bh = bulkhead(2, 0);
        let token = CancellationToken::new();
        token.cancel();

        let err = bh
            .execute_with(|| async { Ok(()) }, Admission::new().with_cancel(token))
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::BulkheadCancelled { .. }));
        assert_eq!(bh.current_usage(), 0);
    }
}
