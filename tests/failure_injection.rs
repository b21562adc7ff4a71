//! Failure injection tests: tripped breakers, overloaded bulkheads, failing health checks.

use std::time::Duration;

use resilience_kit::config::BulkheadConfig;
use resilience_kit::error::{BoxError, ResilienceError};
use resilience_kit::health::HealthMonitor;
use resilience_kit::resilience::{Admission, Bulkhead, CircuitState, ResilienceRegistry};
use tokio_util::sync::CancellationToken;

mod common;

use common::{fast_config, ConcurrencyProbe, FlakyUpstream};

#[tokio::test(start_paused = true)]
async fn test_breaker_trips_and_recovers() {
    let registry = ResilienceRegistry::new(fast_config());
    let breaker = registry.breaker("db");
    let upstream = FlakyUpstream::failing_first(4);

    for _ in 0..3 {
        let err = breaker.execute(|| upstream.call()).await.unwrap_err();
        assert!(err.is_transient());
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(upstream.calls(), 3);

    // Open: fail fast without touching the upstream.
    let err = breaker.execute(|| upstream.call()).await.unwrap_err();
    match err {
        ResilienceError::CircuitOpen { resource, retry_after } => {
            assert_eq!(resource, "db");
            assert_eq!(retry_after, Duration::from_millis(1_000));
        }
        other => panic!("expected CircuitOpen, got {other}"),
    }
    assert_eq!(upstream.calls(), 3);

    // First trial fails (4th upstream failure) and reopens the circuit.
    tokio::time::advance(Duration::from_millis(1_000)).await;
    assert!(breaker.execute(|| upstream.call()).await.is_err());
    assert_eq!(breaker.state(), CircuitState::Open);
    let snapshot = breaker.snapshot();
    assert!(snapshot.next_attempt_time.is_some());

    // Upstream has recovered; two trial successes close the circuit.
    tokio::time::advance(Duration::from_millis(1_000)).await;
    breaker.execute(|| upstream.call()).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    breaker.execute(|| upstream.call()).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_bulkhead_overload_rejects_beyond_queue() {
    let bulkhead = Bulkhead::new(
        "render",
        BulkheadConfig {
            max_concurrent: 2,
            max_queue: 2,
            max_wait_ms: None,
        },
    );
    let probe = ConcurrencyProbe::default();

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let bulkhead = bulkhead.clone();
        let probe = probe.clone();
        tasks.push(tokio::spawn(async move {
            bulkhead.execute(|| probe.run(Duration::from_secs(1))).await
        }));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(bulkhead.current_usage(), 2);
    assert_eq!(bulkhead.queue_length(), 2);

    let err = bulkhead
        .execute(|| async { Ok(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, ResilienceError::BulkheadFull { max_queue: 2, .. }));
    assert!(err.is_bulkhead_rejection());

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(probe.peak(), 2);
    assert_eq!(bulkhead.current_usage(), 0);
    assert_eq!(bulkhead.queue_length(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_bulkhead_waiters_cancelled_and_timed_out() {
    let bulkhead = Bulkhead::new(
        "export",
        BulkheadConfig {
            max_concurrent: 1,
            max_queue: 10,
            max_wait_ms: None,
        },
    );
    let probe = ConcurrencyProbe::default();

    let holder = {
        let bulkhead = bulkhead.clone();
        let probe = probe.clone();
        tokio::spawn(async move { bulkhead.execute(|| probe.run(Duration::from_secs(5))).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let token = CancellationToken::new();
    let cancelled = {
        let bulkhead = bulkhead.clone();
        let admission = Admission::new().with_cancel(token.clone());
        tokio::spawn(async move { bulkhead.execute_with(|| async { Ok(()) }, admission).await })
    };

    let timed_out = bulkhead
        .execute_with(
            || async { Ok(()) },
            Admission::new().with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(timed_out, ResilienceError::BulkheadTimeout { .. }));

    token.cancel();
    let err = cancelled.await.unwrap().unwrap_err();
    assert!(matches!(err, ResilienceError::BulkheadCancelled { .. }));
    assert_eq!(bulkhead.queue_length(), 0);

    holder.await.unwrap().unwrap();
    assert_eq!(bulkhead.current_usage(), 0);
}

#[tokio::test]
async fn test_health_reflects_tripped_breaker() {
    let registry = ResilienceRegistry::new(fast_config());
    let breaker = registry.breaker("payments");
    let monitor = HealthMonitor::default();

    let probe_breaker = breaker.clone();
    monitor.register_check("payments_breaker", move || {
        let closed = probe_breaker.state() != CircuitState::Open;
        async move { Ok(closed) }
    });
    monitor.register_check("queue", || async { Err::<bool, BoxError>("queue depth unknown".into()) });

    assert!(monitor.run_checks().await.checks[0].healthy);

    let upstream = FlakyUpstream::always_failing().permanent();
    for _ in 0..3 {
        let _ = breaker.execute(|| upstream.call()).await;
    }

    let report = monitor.run_checks().await;
    assert!(!report.healthy);
    assert_eq!(report.checks.len(), 2);
    assert!(!report.checks[0].healthy);
    assert!(report.checks[0].error.is_none());
    assert_eq!(report.checks[1].error.as_deref(), Some("queue depth unknown"));
}
