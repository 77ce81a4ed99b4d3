//! Chaos testing for misbehaving providers and concurrent operations.
//!
//! Drives the engine with providers that panic, hang, flap or crowd the
//! bulkhead:
//! - A panicking provider is contained and recorded
//! - Concurrent operations never share state
//! - A failing provider trips its circuit breaker
//! - The bulkhead bounds in-flight calls

// Chaos tests use expect/unwrap/panic for simplicity - panics are acceptable in tests
// Needless collect is sometimes needed for clearer concurrent test structure
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::needless_collect
)]

use convergent::config::{PhaseConfig, ResilienceConfig};
use convergent::models::{CallStatus, ErrorKind, Provider, capability};
use convergent::providers::{
    ProviderClient, ProviderFuture, ProviderRegistry, ProviderRequest, ResilientProvider,
    StaticSource,
};
use convergent::{Engine, EngineConfig, OperationStatus, PresentationConfig, ProviderId};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Panics on every call.
struct PanickingClient;

impl ProviderClient for PanickingClient {
    fn invoke<'a>(&'a self, _request: &'a ProviderRequest, _deadline: Instant) -> ProviderFuture<'a> {
        Box::pin(async move { panic!("provider exploded") })
    }

    fn kind(&self) -> &'static str {
        "panicking"
    }
}

/// Records the peak number of concurrent calls.
struct ProbeClient {
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ProviderClient for ProbeClient {
    fn invoke<'a>(&'a self, request: &'a ProviderRequest, _deadline: Instant) -> ProviderFuture<'a> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({ "summary": format!("probe saw {}", request.target) }))
        })
    }

    fn kind(&self) -> &'static str {
        "probe"
    }
}

fn surface(id: &str, priority: u32) -> Provider {
    Provider::new(id, priority, 0.8).with_capability(capability::SURFACE)
}

fn single_phase() -> EngineConfig {
    EngineConfig::default()
        .with_per_call_timeout_ms(200)
        .with_phases(vec![PhaseConfig::new("surface")])
}

// ============================================================================
// Panics
// ============================================================================

#[tokio::test]
async fn test_panicking_provider_is_contained() {
    let registry = ProviderRegistry::new()
        .register(surface("steady", 1), Arc::new(StaticSource::new("steady")))
        .unwrap()
        .register(surface("volatile", 2), Arc::new(PanickingClient))
        .unwrap();
    let engine = Engine::new(single_phase(), registry).unwrap();

    let run = engine
        .run_pipeline("flaky upstreams", &[], PresentationConfig::default())
        .await
        .unwrap();

    assert_eq!(run.status, OperationStatus::Completed);
    let layer = &run.layers[0];
    assert_eq!(layer.contributing_sources, vec![ProviderId::from("steady")]);
    let volatile = layer
        .outcomes
        .iter()
        .find(|o| o.provider_id.as_str() == "volatile")
        .unwrap();
    assert_eq!(volatile.status, CallStatus::Failure);
    assert_eq!(volatile.error_kind, Some(ErrorKind::Panicked));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_operations_are_isolated() {
    let config = EngineConfig::default().with_per_call_timeout_ms(1_000);
    let engine = Arc::new(Engine::from_config(config).unwrap());
    let operations = 24;

    let handles: Vec<_> = (0..operations)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let target = format!("target-{i}");
                let session = format!("session-{}", i % 4);
                let run = engine
                    .run_pipeline_with(
                        &target,
                        &[],
                        PresentationConfig::default(),
                        convergent::services::RunOptions::default().with_session(session),
                    )
                    .await
                    .unwrap();
                (target, run)
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        let (target, run) = handle.await.unwrap();
        assert_eq!(run.status, OperationStatus::Completed);
        assert!(run.layers.iter().all(|l| l.summary.contains(&target)));
        assert!(ids.insert(run.operation_id.clone()), "duplicate id");
        assert_eq!(engine.operation_status(&run.operation_id).unwrap().target, target);
    }

    assert_eq!(ids.len(), operations);
    assert_eq!(engine.tracker().len(), operations);
    assert_eq!(engine.sessions().len(), 4);
    for s in 0..4 {
        let record = engine.sessions().get(&format!("session-{s}")).unwrap();
        assert_eq!(record.history.len(), 6);
    }
}

#[tokio::test]
async fn test_bulkhead_bounds_in_flight_calls() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let registry = (0..6u32).fold(ProviderRegistry::new(), |registry, i| {
        let client = ProbeClient {
            in_flight: Arc::clone(&in_flight),
            peak: Arc::clone(&peak),
        };
        registry
            .register(surface(&format!("probe-{i}"), i), Arc::new(client))
            .unwrap()
    });
    let config = EngineConfig {
        max_concurrent_calls: 2,
        ..single_phase()
    };
    let engine = Engine::new(config, registry).unwrap();

    let run = engine
        .run_pipeline("crowd", &[], PresentationConfig::default())
        .await
        .unwrap();

    assert_eq!(run.layers[0].contributing_sources.len(), 6);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Circuit breaker
// ============================================================================

#[tokio::test]
async fn test_failing_provider_trips_breaker() {
    let resilience = ResilienceConfig {
        breaker_failure_threshold: 2,
        breaker_reset_ms: 60_000,
        ..ResilienceConfig::default()
    };
    let flaky = Arc::new(ResilientProvider::new(
        "flaky",
        StaticSource::failing("flaky", "503"),
        &resilience,
    ));
    let registry = ProviderRegistry::new()
        .register(surface("steady", 1), Arc::new(StaticSource::new("steady")))
        .unwrap()
        .register(surface("flaky", 2), Arc::clone(&flaky) as Arc<dyn ProviderClient>)
        .unwrap();
    let engine = Engine::new(single_phase(), registry).unwrap();

    let mut kinds = Vec::new();
    for _ in 0..3 {
        let run = engine
            .run_pipeline("breaker", &[], PresentationConfig::default())
            .await
            .unwrap();
        assert_eq!(run.status, OperationStatus::Completed);
        let attempt = run.layers[0]
            .outcomes
            .iter()
            .find(|o| o.provider_id.as_str() == "flaky")
            .unwrap();
        kinds.push(attempt.error_kind);
    }

    assert_eq!(
        kinds,
        vec![
            Some(ErrorKind::Upstream),
            Some(ErrorKind::Upstream),
            Some(ErrorKind::CircuitOpen)
        ]
    );
    assert_eq!(flaky.breaker_state(), 1);
    assert_eq!(flaky.inner().call_count(), 2);
}
