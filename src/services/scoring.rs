//! Reliability scoring.
//!
//! A batch of outcomes is scored as the mean of the per-outcome scores of
//! every provider that was actually attempted, plus a bounded bonus for the
//! number of distinct sources that succeeded and a flat bonus when an
//! enhancement step refined the batch. Results are clamped to `[0, 1]`.
//!
//! Flipping any attempted outcome from failure to success never lowers the
//! aggregate: the mean rises by that provider's base reliability and the
//! diversity bonus grows with each distinct success.

use crate::config::ScoringConfig;
use crate::models::{CallOutcome, ErrorKind, IntelligenceLayer, ProviderId};
use std::collections::HashSet;

/// Computes layer and result reliability.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReliabilityScorer {
    config: ScoringConfig,
}

impl ReliabilityScorer {
    /// Creates a scorer; constants are clamped into range.
    #[must_use]
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config: config.sanitized(),
        }
    }

    /// Returns the active constants.
    #[must_use]
    pub const fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Scores a single outcome: its provider's base reliability on success,
    /// zero otherwise.
    #[must_use]
    pub fn score_outcome(outcome: &CallOutcome, base_reliability: f64) -> f64 {
        if outcome.is_success() {
            clamp_unit(base_reliability)
        } else {
            0.0
        }
    }

    /// Scores a batch of outcomes.
    ///
    /// Outcomes that never reached a provider (`no_providers`) do not count
    /// as attempts. A batch with no attempts scores zero.
    #[must_use]
    pub fn aggregate<F>(&self, outcomes: &[CallOutcome], base_reliability: F, enhanced: bool) -> f64
    where
        F: Fn(&ProviderId) -> f64,
    {
        let attempted: Vec<&CallOutcome> = outcomes
            .iter()
            .filter(|o| o.error_kind != Some(ErrorKind::NoProviders))
            .collect();
        if attempted.is_empty() {
            return 0.0;
        }

        let total: f64 = attempted
            .iter()
            .map(|o| Self::score_outcome(o, base_reliability(&o.provider_id)))
            .sum();
        let mean = total / attempted.len() as f64;

        let distinct_successes = attempted
            .iter()
            .filter(|o| o.is_success())
            .map(|o| &o.provider_id)
            .collect::<HashSet<_>>()
            .len();
        let mut score = mean + self.diversity_bonus(distinct_successes);
        if enhanced && distinct_successes > 0 {
            score += self.config.enhancement_bonus;
        }

        clamp_unit(score)
    }

    /// Bonus for `distinct` successful sources.
    ///
    /// Grows with every extra source and approaches `diversity_cap` without
    /// reaching it.
    #[must_use]
    pub fn diversity_bonus(&self, distinct: usize) -> f64 {
        if distinct == 0 {
            return 0.0;
        }
        let exponent = i32::try_from(distinct).unwrap_or(i32::MAX);
        self.config.diversity_cap * (1.0 - self.config.diversity_decay.powi(exponent))
    }

    /// Scores a phase's outcomes as a layer, never below the reliability
    /// floor.
    #[must_use]
    pub fn layer_reliability<F>(
        &self,
        outcomes: &[CallOutcome],
        base_reliability: F,
        enhanced: bool,
    ) -> f64
    where
        F: Fn(&ProviderId) -> f64,
    {
        if !outcomes.iter().any(CallOutcome::is_success) {
            return self.config.reliability_floor;
        }
        self.aggregate(outcomes, base_reliability, enhanced)
            .max(self.config.reliability_floor)
    }

    /// Returns the reliability floor.
    #[must_use]
    pub const fn reliability_floor(&self) -> f64 {
        self.config.reliability_floor
    }

    /// Final confidence percentage in `[0, 100]`.
    ///
    /// Mean layer reliability, plus the synthesis bonus when a provider
    /// (rather than the local template) wrote the narrative.
    #[must_use]
    pub fn confidence_score(&self, layers: &[IntelligenceLayer], synthesized: bool) -> f64 {
        if layers.is_empty() {
            return 0.0;
        }
        let mean = layers.iter().map(|l| l.reliability).sum::<f64>() / layers.len() as f64;
        let bonus = if synthesized {
            self.config.synthesis_bonus
        } else {
            0.0
        };
        let score = clamp_unit(mean + bonus) * 100.0;
        (score * 100.0).round() / 100.0
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CallStatus;
    use serde_json::json;
    use std::time::Duration;

    fn ok(id: &str) -> CallOutcome {
        CallOutcome::success(ProviderId::from(id), json!("data"), Duration::ZERO)
    }

    fn timed_out(id: &str) -> CallOutcome {
        CallOutcome::timeout(ProviderId::from(id), ErrorKind::Timeout, Duration::ZERO)
    }

    fn base(_: &ProviderId) -> f64 {
        0.8
    }

    fn layer(reliability: f64) -> IntelligenceLayer {
        let mut layer = IntelligenceLayer::fallback(0, "surface", "overview", 0.05, "test");
        layer.reliability = reliability;
        layer
    }

    #[test]
    fn test_score_outcome() {
        assert!((ReliabilityScorer::score_outcome(&ok("a"), 0.7) - 0.7).abs() < 1e-9);
        assert!(ReliabilityScorer::score_outcome(&timed_out("a"), 0.7).abs() < 1e-9);
        assert!((ReliabilityScorer::score_outcome(&ok("a"), 1.5) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_empty_is_zero() {
        let scorer = ReliabilityScorer::default();
        assert!(scorer.aggregate(&[], base, false).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_ignores_unattempted() {
        let scorer = ReliabilityScorer::default();
        let none = CallOutcome::failure(
            ProviderId::from("none"),
            ErrorKind::NoProviders,
            "no providers",
            Duration::ZERO,
        );
        let with_none = scorer.aggregate(&[ok("a"), none], base, false);
        let without = scorer.aggregate(&[ok("a")], base, false);
        assert!((with_none - without).abs() < 1e-9);
    }

    #[test]
    fn test_one_success_among_timeouts_scores_lower() {
        let scorer = ReliabilityScorer::default();
        let single = scorer.aggregate(&[ok("a")], base, false);
        let mixed = scorer.aggregate(
            &[ok("a"), timed_out("b"), timed_out("c"), timed_out("d"), timed_out("e")],
            base,
            false,
        );
        assert!(mixed < single);
        assert!(mixed > 0.0);
    }

    #[test]
    fn test_diversity_bonus_grows_and_is_bounded() {
        let scorer = ReliabilityScorer::default();
        let cap = scorer.config().diversity_cap;
        let mut previous = 0.0;
        for distinct in 1..10 {
            let bonus = scorer.diversity_bonus(distinct);
            assert!(bonus > previous);
            assert!(bonus < cap);
            previous = bonus;
        }
        assert!(scorer.diversity_bonus(0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_provider_counts_once_for_diversity() {
        let scorer = ReliabilityScorer::default();
        let twice = scorer.aggregate(&[ok("a"), ok("a")], base, false);
        let once = scorer.aggregate(&[ok("a")], base, false);
        assert!((twice - once).abs() < 1e-9);
    }

    #[test]
    fn test_enhancement_bonus_requires_success() {
        let scorer = ReliabilityScorer::default();
        let plain = scorer.aggregate(&[ok("a")], base, false);
        let enhanced = scorer.aggregate(&[ok("a")], base, true);
        assert!(enhanced > plain);

        let failed = scorer.aggregate(&[timed_out("a")], base, true);
        assert!(failed.abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_is_clamped() {
        let scorer = ReliabilityScorer::default();
        let score = scorer.aggregate(&[ok("a"), ok("b"), ok("c")], |_| 1.0, true);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_layer_reliability_floor() {
        let scorer = ReliabilityScorer::default();
        let floor = scorer.reliability_floor();
        let reliability = scorer.layer_reliability(&[timed_out("a")], base, false);
        assert!((reliability - floor).abs() < 1e-9);

        let low = scorer.layer_reliability(&[ok("a")], |_| 0.0, false);
        assert!(low >= floor);
    }

    #[test]
    fn test_confidence_score() {
        let scorer = ReliabilityScorer::default();
        let layers = vec![layer(0.8), layer(0.6)];
        assert!((scorer.confidence_score(&layers, false) - 70.0).abs() < 1e-9);
        assert!((scorer.confidence_score(&layers, true) - 75.0).abs() < 1e-9);
        assert!(scorer.confidence_score(&[], true).abs() < 1e-9);
        assert!((scorer.confidence_score(&[layer(1.0)], true) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_timeout_status_scores_zero() {
        assert_eq!(timed_out("a").status, CallStatus::Timeout);
        let scorer = ReliabilityScorer::default();
        assert!(scorer.aggregate(&[timed_out("a")], base, false).abs() < 1e-9);
    }
}
