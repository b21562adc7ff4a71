//! End-to-end composition tests.

use std::sync::Arc;
use std::time::Duration;

use resilience_kit::cache::{CacheAside, Freshness};
use resilience_kit::config::{parse_config, BulkheadConfig, CircuitBreakerConfig, Jitter, RetryConfig};
use resilience_kit::error::ResilienceError;
use resilience_kit::resilience::{
    Bulkhead, CircuitBreaker, CircuitState, FallbackChain, Pipeline, ResilienceRegistry,
    RetryExecutor, RetryPolicy, ServedBy,
};

mod common;

use common::{fast_config, FlakyUpstream};

fn retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        max_attempts,
        initial_delay_ms: 10,
        max_delay_ms: 100,
        backoff_multiplier: 2.0,
        jitter: Jitter::None,
    })
}

#[tokio::test(start_paused = true)]
async fn test_retry_inside_breaker_hides_transient_failures() {
    let upstream = FlakyUpstream::failing_first(4);
    let bulkhead = Bulkhead::new("orders", BulkheadConfig::default());
    let breaker = CircuitBreaker::new(
        "orders",
        CircuitBreakerConfig {
            failure_threshold: 10,
            ..Default::default()
        },
    );
    let policy = retry(5);

    let value = bulkhead
        .execute(|| {
            breaker.execute(|| RetryExecutor::run("orders.fetch", || upstream.call(), &policy))
        })
        .await
        .unwrap();

    assert_eq!(value, "ok on call 4");
    assert_eq!(upstream.calls(), 5);
    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failure_count, 0);
    assert_eq!(bulkhead.current_usage(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_registry_pipeline_falls_back_then_opens() {
    let registry = ResilienceRegistry::new(fast_config());
    let fallbacks = Arc::new(FallbackChain::new());
    fallbacks.register("sku:1", || async { Err(ResilienceError::transient("replica lagging")) }, 10);
    fallbacks.register("sku:1", || async { Ok("catalog default".to_string()) }, 1);

    let pipeline = Pipeline::from_registry(&registry, "catalog").with_fallback(fallbacks);
    let upstream = FlakyUpstream::always_failing();

    // Each call spends the retry budget (3 attempts) then falls back.
    for _ in 0..3 {
        let served = pipeline.call("sku:1", || upstream.call()).await.unwrap();
        assert_eq!(served.value, "catalog default");
        assert_eq!(served.served_by, ServedBy::Fallback { priority: 1 });
    }
    assert_eq!(upstream.calls(), 9);
    assert_eq!(registry.breaker("catalog").state(), CircuitState::Open);

    // Breaker open: the upstream is no longer called, fallback still serves.
    let served = pipeline.call("sku:1", || upstream.call()).await.unwrap();
    assert_eq!(served.value, "catalog default");
    assert_eq!(upstream.calls(), 9);
}

#[tokio::test(start_paused = true)]
async fn test_cached_pipeline_serves_hit_then_stale() {
    let registry = ResilienceRegistry::new(fast_config());
    let cache = Arc::new(CacheAside::new("profiles", fast_config().cache));
    let pipeline: Pipeline<String> =
        Pipeline::from_registry(&registry, "profiles").with_cache(cache.clone(), None);

    let healthy = FlakyUpstream::failing_first(0);
    let first = pipeline.call("user:7", || healthy.call()).await.unwrap();
    assert_eq!(first.served_by, ServedBy::Primary(Freshness::Fetched));

    let second = pipeline.call("user:7", || healthy.call()).await.unwrap();
    assert_eq!(second.served_by, ServedBy::Primary(Freshness::Hit));
    assert_eq!(second.value, first.value);
    assert_eq!(healthy.calls(), 1);

    // Past the 1s TTL with the upstream down: stale data, no retries.
    tokio::time::advance(Duration::from_secs(2)).await;
    let down = FlakyUpstream::always_failing();
    let third = pipeline.call("user:7", || down.call()).await.unwrap();
    assert_eq!(third.served_by, ServedBy::Primary(Freshness::Stale));
    assert_eq!(third.value, first.value);
    assert_eq!(down.calls(), 1);

    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.stale_served), (1, 2, 1));
}

#[tokio::test(start_paused = true)]
async fn test_uncached_key_without_fallback_surfaces_exhaustion() {
    let registry = ResilienceRegistry::new(fast_config());
    let pipeline: Pipeline<String> = Pipeline::from_registry(&registry, "search");
    let upstream = FlakyUpstream::always_failing();

    let err = pipeline.call("q", || upstream.call()).await.unwrap_err();
    match err {
        ResilienceError::RetriesExhausted { operation, attempts, source } => {
            assert_eq!(operation, "search");
            assert_eq!(attempts, 3);
            assert!(source.is_transient());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_permanent_errors_skip_retries() {
    let registry = ResilienceRegistry::new(fast_config());
    let pipeline: Pipeline<String> = Pipeline::from_registry(&registry, "auth");
    let upstream = FlakyUpstream::always_failing().permanent();

    let err = pipeline.call("token", || upstream.call()).await.unwrap_err();
    assert!(matches!(err, ResilienceError::Permanent(_)));
    assert_eq!(upstream.calls(), 1);
    assert_eq!(registry.breaker("auth").snapshot().failure_count, 1);
}

#[test]
fn test_registry_built_from_toml() {
    let config = parse_config(
        r#"
        [circuit_breaker]
        failure_threshold = 4

        [resources.payments.circuit_breaker]
        failure_threshold = 1
        reset_timeout_ms = 500

        [resources.payments.bulkhead]
        max_concurrent = 3
        max_queue = 0
        "#,
    )
    .unwrap();

    let registry = ResilienceRegistry::new(config);
    assert_eq!(registry.breaker("payments").config().failure_threshold, 1);
    assert_eq!(registry.breaker("other").config().failure_threshold, 4);
    assert_eq!(registry.bulkhead("payments").max_concurrent(), 3);
    assert_eq!(registry.bulkhead("other").max_concurrent(), 10);
}
