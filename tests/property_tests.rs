//! Property-based tests for scoring and presentation.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Batch and layer scores stay within `[0, 1]`
//! - Turning a failure into a success never lowers a score
//! - Confidence stays within `[0, 100]`
//! - The local template never renders an empty narrative
//! - Fan-out returns exactly one outcome per provider, in input order
//! - Presentation normalization never fails

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use convergent::models::{
    CallOutcome, ErrorKind, IntelligenceLayer, PresentationConfig, ProviderId, Structure, Tone,
    Verbosity,
};
use convergent::ScoringConfig;
use convergent::models::{CallStatus, Provider};
use convergent::providers::{ProviderRequest, RegisteredProvider, StaticBehavior, StaticSource};
use convergent::services::{FanOutAggregator, ReliabilityScorer, render_local_template};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn outcome(index: usize, success: bool) -> CallOutcome {
    let id = ProviderId::from(format!("p{index}"));
    if success {
        CallOutcome::success(id, json!({ "summary": "ok" }), Duration::from_millis(3))
    } else {
        CallOutcome::failure(id, ErrorKind::Upstream, "down", Duration::from_millis(3))
    }
}

fn batch(flags: &[bool]) -> Vec<CallOutcome> {
    flags
        .iter()
        .enumerate()
        .map(|(i, ok)| outcome(i, *ok))
        .collect()
}

fn reliability_of(weights: &[f64]) -> impl Fn(&ProviderId) -> f64 + '_ {
    move |id| {
        id.as_str()
            .trim_start_matches('p')
            .parse::<usize>()
            .ok()
            .and_then(|i| weights.get(i).copied())
            .unwrap_or(0.0)
    }
}

fn scoring_config() -> impl Strategy<Value = ScoringConfig> {
    (0.0..=1.0f64, 0.0..=1.0f64, 0.0..=1.0f64, 0.0..=1.0f64, 0.0..=1.0f64).prop_map(
        |(diversity_cap, diversity_decay, enhancement_bonus, reliability_floor, synthesis_bonus)| {
            ScoringConfig {
                diversity_cap,
                diversity_decay,
                enhancement_bonus,
                reliability_floor,
                synthesis_bonus,
            }
        },
    )
}

fn layer(index: usize, reliability: f64, fallback: bool) -> IntelligenceLayer {
    let name = format!("phase{index}");
    let mut layer = IntelligenceLayer::fallback(index, &name, "data", reliability, "test");
    if !fallback {
        layer.fallback_only = false;
        layer.contributing_sources = vec![ProviderId::from(format!("p{index}"))];
        layer.summary = format!("finding {index}");
    }
    layer
}

fn behavior() -> impl Strategy<Value = StaticBehavior> {
    prop_oneof![
        Just(StaticBehavior::Respond),
        Just(StaticBehavior::Fail("down".to_string())),
        Just(StaticBehavior::Malformed),
        Just(StaticBehavior::Hang),
    ]
}

fn verbosity() -> impl Strategy<Value = Verbosity> {
    prop_oneof![
        Just(Verbosity::Concise),
        Just(Verbosity::Detailed),
        Just(Verbosity::Comprehensive)
    ]
}

fn structure() -> impl Strategy<Value = Structure> {
    prop_oneof![Just(Structure::Flat), Just(Structure::Sectioned)]
}

fn tone() -> impl Strategy<Value = Tone> {
    prop_oneof![Just(Tone::Neutral), Just(Tone::Assertive), Just(Tone::Technical)]
}

// ============================================================================
// Scoring
// ============================================================================

proptest! {
    /// Property: batch scores are always within `[0, 1]`.
    #[test]
    fn prop_aggregate_bounded(
        flags in prop::collection::vec(any::<bool>(), 0..12),
        weights in prop::collection::vec(0.0..=1.0f64, 12),
        config in scoring_config(),
        enhanced in any::<bool>(),
    ) {
        let scorer = ReliabilityScorer::new(config);
        let score = scorer.aggregate(&batch(&flags), reliability_of(&weights), enhanced);
        prop_assert!((0.0..=1.0).contains(&score), "score {score}");
    }

    /// Property: flipping one failure to a success never lowers the score.
    #[test]
    fn prop_aggregate_monotonic(
        flags in prop::collection::vec(any::<bool>(), 1..12),
        weights in prop::collection::vec(0.0..=1.0f64, 12),
        config in scoring_config(),
        enhanced in any::<bool>(),
        pick in any::<prop::sample::Index>(),
    ) {
        let scorer = ReliabilityScorer::new(config);
        let flip = pick.index(flags.len());
        prop_assume!(!flags[flip]);

        let mut improved = flags.clone();
        improved[flip] = true;
        let before = scorer.aggregate(&batch(&flags), reliability_of(&weights), enhanced);
        let after = scorer.aggregate(&batch(&improved), reliability_of(&weights), enhanced);
        prop_assert!(after >= before - 1e-12, "{before} -> {after}");
    }

    /// Property: a layer never scores below the floor.
    #[test]
    fn prop_layer_reliability_floor(
        flags in prop::collection::vec(any::<bool>(), 0..8),
        weights in prop::collection::vec(0.0..=1.0f64, 8),
        config in scoring_config(),
    ) {
        let scorer = ReliabilityScorer::new(config);
        let reliability = scorer.layer_reliability(&batch(&flags), reliability_of(&weights), false);
        prop_assert!(reliability >= scorer.reliability_floor());
        prop_assert!(reliability <= 1.0);
    }

    /// Property: confidence is a percentage with at most two decimals.
    #[test]
    fn prop_confidence_bounded(
        reliabilities in prop::collection::vec(0.0..=1.0f64, 0..6),
        config in scoring_config(),
        synthesized in any::<bool>(),
    ) {
        let scorer = ReliabilityScorer::new(config);
        let layers: Vec<_> = reliabilities
            .iter()
            .enumerate()
            .map(|(i, r)| layer(i, *r, false))
            .collect();
        let confidence = scorer.confidence_score(&layers, synthesized);
        prop_assert!((0.0..=100.0).contains(&confidence));
        prop_assert!(((confidence * 100.0).round() - confidence * 100.0).abs() < 1e-6);
    }
}

// ============================================================================
// Fan-out
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: one outcome per provider, in input order, success only for
    /// providers that answer.
    #[test]
    fn prop_fan_out_settles_every_provider(
        behaviors in prop::collection::vec(behavior(), 0..8),
        max_concurrent in 1usize..4,
    ) {
        let providers: Vec<RegisteredProvider> = behaviors
            .iter()
            .enumerate()
            .map(|(i, behavior)| {
                let id = format!("p{i}");
                let source = StaticSource::new(id.clone()).with_behavior(behavior.clone());
                RegisteredProvider::new(Provider::new(id, 1, 0.5), Arc::new(source))
            })
            .collect();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        let outcomes = runtime.block_on(FanOutAggregator::new(max_concurrent).call_all(
            &providers,
            &ProviderRequest::new("prop"),
            Duration::from_millis(10),
            None,
        ));

        prop_assert_eq!(outcomes.len(), providers.len());
        for (i, (outcome, behavior)) in outcomes.iter().zip(&behaviors).enumerate() {
            prop_assert_eq!(outcome.provider_id.as_str(), format!("p{i}"));
            let expected = match behavior {
                StaticBehavior::Respond => CallStatus::Success,
                StaticBehavior::Hang => CallStatus::Timeout,
                _ => CallStatus::Failure,
            };
            prop_assert_eq!(outcome.status, expected);
        }
    }
}

// ============================================================================
// Presentation
// ============================================================================

proptest! {
    /// Property: the local template always produces text.
    #[test]
    fn prop_local_template_never_empty(
        target in ".{0,40}",
        reliabilities in prop::collection::vec(0.0..=1.0f64, 0..5),
        fallback in any::<bool>(),
        verbosity in verbosity(),
        structure in structure(),
        tone in tone(),
    ) {
        let layers: Vec<_> = reliabilities
            .iter()
            .enumerate()
            .map(|(i, r)| layer(i, *r, fallback))
            .collect();
        let presentation = PresentationConfig::default()
            .with_verbosity(verbosity)
            .with_structure(structure)
            .with_tone(tone);
        let narrative = render_local_template(&target, &layers, presentation);
        prop_assert!(!narrative.trim().is_empty());
    }

    /// Property: normalization accepts any input and is stable.
    #[test]
    fn prop_normalize_total(
        verbosity in prop::option::of("[a-zA-Z ]{0,16}"),
        structure in prop::option::of("[a-zA-Z ]{0,16}"),
        tone in prop::option::of("[a-zA-Z ]{0,16}"),
    ) {
        let config = PresentationConfig::normalize(
            verbosity.as_deref(),
            structure.as_deref(),
            tone.as_deref(),
        );
        let again = PresentationConfig::normalize(
            Some(config.verbosity.as_str()),
            Some(config.structure.as_str()),
            Some(config.tone.as_str()),
        );
        prop_assert_eq!(config, again);
    }
}
