//! Benchmarks for reliability scoring and the local template.
//!
//! Scoring runs once per phase and the template once per degraded
//! operation, so both should stay well below provider latency even for
//! wide fan-outs.

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::cast_precision_loss)]

use convergent::models::{CallOutcome, ErrorKind, IntelligenceLayer, ProviderId};
use convergent::services::{ReliabilityScorer, render_local_template};
use convergent::{PresentationConfig, Structure, Tone, Verbosity};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use std::time::Duration;

// ============================================================================
// Fixtures
// ============================================================================

/// Every third outcome fails, every fifth times out.
fn outcomes(count: usize) -> Vec<CallOutcome> {
    (0..count)
        .map(|i| {
            let id = ProviderId::from(format!("provider-{i}"));
            let latency = Duration::from_millis(5);
            if i % 5 == 4 {
                CallOutcome::timeout(id, ErrorKind::Timeout, latency)
            } else if i % 3 == 2 {
                CallOutcome::failure(id, ErrorKind::Upstream, "503", latency)
            } else {
                CallOutcome::success(id, json!({ "summary": format!("finding {i}") }), latency)
            }
        })
        .collect()
}

fn layers(count: usize) -> Vec<IntelligenceLayer> {
    (0..count)
        .map(|i| {
            let name = format!("phase-{i}");
            let mut layer = IntelligenceLayer::fallback(i, &name, "analysis", 0.6, "bench");
            if i % 4 != 3 {
                layer.fallback_only = false;
                layer.contributing_sources = vec![ProviderId::from(format!("provider-{i}"))];
                layer.summary = format!("Line one for {name}.\nLine two with detail.");
            }
            layer
        })
        .collect()
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_aggregate(c: &mut Criterion) {
    let scorer = ReliabilityScorer::default();
    let mut group = c.benchmark_group("aggregate");

    for count in [4usize, 16, 64, 256] {
        let batch = outcomes(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &batch, |b, batch| {
            b.iter(|| {
                black_box(scorer.layer_reliability(
                    black_box(batch),
                    |id| if id.as_str().ends_with('0') { 0.9 } else { 0.7 },
                    true,
                ))
            });
        });
    }

    group.finish();
}

fn bench_confidence(c: &mut Criterion) {
    let scorer = ReliabilityScorer::default();
    let stack = layers(8);
    c.bench_function("confidence_score/8_layers", |b| {
        b.iter(|| black_box(scorer.confidence_score(black_box(&stack), true)));
    });
}

fn bench_local_template(c: &mut Criterion) {
    let stack = layers(8);
    let mut group = c.benchmark_group("local_template");

    let presentations = [
        ("concise_flat", PresentationConfig::default().with_verbosity(Verbosity::Concise)),
        (
            "comprehensive_sectioned",
            PresentationConfig::default()
                .with_verbosity(Verbosity::Comprehensive)
                .with_structure(Structure::Sectioned),
        ),
        (
            "technical",
            PresentationConfig::default()
                .with_tone(Tone::Technical)
                .with_structure(Structure::Sectioned),
        ),
    ];
    for (name, presentation) in presentations {
        group.bench_function(name, |b| {
            b.iter(|| {
                black_box(render_local_template(
                    black_box("distributed tracing"),
                    black_box(&stack),
                    presentation,
                ))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_aggregate, bench_confidence, bench_local_template);
criterion_main!(benches);
