//! Sequential multi-phase pipeline.
//!
//! Phases run one after another; inside a phase every provider slot runs
//! concurrently. Each phase sees the layers produced before it as read-only
//! context. A phase that gets nothing usable still yields a layer, marked as
//! a fallback, so every operation has one layer per configured phase.

use super::fanout::FanOutAggregator;
use super::scoring::ReliabilityScorer;
use crate::config::{DEFAULT_PHASE_TIMEOUT_MS, PhaseConfig};
use crate::models::{
    AttemptRecord, CallOutcome, IntelligenceLayer, OperationStatus, ProviderId, capability,
    duration_ms,
};
use crate::providers::{ProviderRegistry, ProviderRequest};
use crate::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;

/// Layers produced by one pipeline pass.
#[derive(Debug, Clone)]
pub struct PipelineLayers {
    /// One layer per phase, in phase order.
    pub layers: Vec<IntelligenceLayer>,
    /// `Completed` when every layer has a real source, `PartiallyFailed`
    /// otherwise.
    pub status: OperationStatus,
}

/// Runs the configured phases against a provider registry.
pub struct LayeredPipeline {
    registry: Arc<ProviderRegistry>,
    phases: Vec<PhaseConfig>,
    fanout: FanOutAggregator,
    scorer: ReliabilityScorer,
    per_call_timeout: Duration,
    default_phase_timeout_ms: u64,
}

impl LayeredPipeline {
    /// Creates a pipeline over `registry` running `phases` in order.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, phases: Vec<PhaseConfig>) -> Self {
        Self {
            registry,
            phases,
            fanout: FanOutAggregator::default(),
            scorer: ReliabilityScorer::default(),
            per_call_timeout: Duration::from_secs(5),
            default_phase_timeout_ms: DEFAULT_PHASE_TIMEOUT_MS,
        }
    }

    /// Sets the fan-out aggregator (and with it the shared bulkhead).
    #[must_use]
    pub fn with_fanout(mut self, fanout: FanOutAggregator) -> Self {
        self.fanout = fanout;
        self
    }

    /// Sets the scorer.
    #[must_use]
    pub const fn with_scorer(mut self, scorer: ReliabilityScorer) -> Self {
        self.scorer = scorer;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn with_per_call_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = timeout;
        self
    }

    /// Sets the deadline used by phases without their own.
    #[must_use]
    pub const fn with_default_phase_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_phase_timeout_ms = timeout_ms;
        self
    }

    /// Returns the configured phases.
    #[must_use]
    pub fn phases(&self) -> &[PhaseConfig] {
        &self.phases
    }

    /// Runs every phase and returns the resulting layers.
    ///
    /// `on_layer` is called as soon as each layer is ready. Once
    /// `operation_deadline` has passed, remaining phases are not started and
    /// yield fallback layers instead.
    #[instrument(skip_all, fields(phases = self.phases.len(), status = tracing::field::Empty))]
    pub async fn run<F>(
        &self,
        base: &ProviderRequest,
        operation_deadline: Option<Instant>,
        mut on_layer: F,
    ) -> PipelineLayers
    where
        F: FnMut(&IntelligenceLayer) + Send,
    {
        let mut layers: Vec<IntelligenceLayer> = Vec::with_capacity(self.phases.len());
        for (index, phase) in self.phases.iter().enumerate() {
            let layer = self
                .run_phase(index, phase, base, &layers, operation_deadline)
                .await;
            on_layer(&layer);
            layers.push(layer);
        }

        let status = if layers.iter().all(IntelligenceLayer::has_real_source) {
            OperationStatus::Completed
        } else {
            OperationStatus::PartiallyFailed
        };
        tracing::Span::current().record("status", status.as_str());
        PipelineLayers { layers, status }
    }

    #[instrument(
        skip_all,
        fields(
            phase = %phase.name,
            index = index,
            reliability = tracing::field::Empty,
            fallback_only = tracing::field::Empty
        )
    )]
    async fn run_phase(
        &self,
        index: usize,
        phase: &PhaseConfig,
        base: &ProviderRequest,
        prior: &[IntelligenceLayer],
        operation_deadline: Option<Instant>,
    ) -> IntelligenceLayer {
        let started = Instant::now();
        let layer = self
            .build_layer(index, phase, base, prior, operation_deadline, started)
            .await;

        let span = tracing::Span::current();
        span.record("reliability", layer.reliability);
        span.record("fallback_only", layer.fallback_only);
        metrics::gauge!("phase_reliability", "phase" => phase.name.clone()).set(layer.reliability);
        metrics::histogram!("phase_duration_ms", "phase" => phase.name.clone())
            .record(started.elapsed().as_secs_f64() * 1000.0);
        if layer.fallback_only {
            metrics::counter!("phase_fallbacks_total", "phase" => phase.name.clone()).increment(1);
            tracing::warn!(phase = %phase.name, summary = %layer.summary, "Phase produced a fallback layer");
        } else {
            tracing::debug!(
                phase = %phase.name,
                sources = layer.contributing_sources.len(),
                reliability = layer.reliability,
                "Phase completed"
            );
        }
        layer
    }

    async fn build_layer(
        &self,
        index: usize,
        phase: &PhaseConfig,
        base: &ProviderRequest,
        prior: &[IntelligenceLayer],
        operation_deadline: Option<Instant>,
        started: Instant,
    ) -> IntelligenceLayer {
        if operation_deadline.is_some_and(|deadline| deadline <= started) {
            return self.fallback(index, phase, "operation deadline exceeded", Vec::new(), started);
        }

        let slots = self.registry.slots_for(&phase.capability);
        if slots.is_empty() {
            let err = Error::NoProvidersAvailable {
                capability: phase.capability.clone(),
            };
            tracing::warn!(phase = %phase.name, error = %err, "Skipping phase");
            return self.fallback(index, phase, "no providers", Vec::new(), started);
        }

        let phase_deadline = earliest(
            started + phase.timeout(self.default_phase_timeout_ms),
            operation_deadline,
        );
        let request = base
            .clone()
            .for_phase(phase.name.clone())
            .with_context(context_lines(prior));
        let outcomes = self
            .fanout
            .call_all_cascading(&slots, &request, self.per_call_timeout, Some(phase_deadline))
            .await;

        let mut audit = audit_records(&outcomes);
        let successes: Vec<&CallOutcome> = outcomes.iter().filter(|o| o.is_success()).collect();
        if successes.is_empty() {
            let reason = format!("all {} source(s) failed", outcomes.len());
            return self.fallback(index, phase, &reason, audit, started);
        }

        let mut sources: Vec<ProviderId> = Vec::with_capacity(successes.len());
        for outcome in &successes {
            if !sources.contains(&outcome.provider_id) {
                sources.push(outcome.provider_id.clone());
            }
        }
        let mut summary = successes
            .iter()
            .filter_map(|o| o.summary())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if summary.is_empty() {
            summary = format!("{} source(s) answered without text.", successes.len());
        }

        let mut enhanced = false;
        if phase.enhance {
            if let Some(outcome) = self.enhance(&request, &summary, phase_deadline).await {
                audit.extend(audit_records(std::slice::from_ref(&outcome)));
                if let Some(text) = outcome
                    .summary()
                    .filter(|text| outcome.is_success() && !text.is_empty())
                {
                    summary = text;
                    enhanced = true;
                    if !sources.contains(&outcome.provider_id) {
                        sources.push(outcome.provider_id.clone());
                    }
                }
            }
        }

        let reliability = self.scorer.layer_reliability(
            &outcomes,
            |id| self.registry.base_reliability(id),
            enhanced,
        );

        IntelligenceLayer {
            layer_id: IntelligenceLayer::layer_id_for(index, &phase.name),
            index,
            name: phase.name.clone(),
            data_type: phase.data_type.clone(),
            contributing_sources: sources,
            reliability,
            processing_time_ms: duration_ms(started.elapsed()),
            enhanced,
            summary,
            outcomes: audit,
            fallback_only: false,
        }
    }

    /// Runs the enhancement cascade over the phase summary, if any provider
    /// offers enhancement.
    async fn enhance(
        &self,
        request: &ProviderRequest,
        summary: &str,
        phase_deadline: Instant,
    ) -> Option<CallOutcome> {
        let providers = self.registry.with_capability(capability::ENHANCEMENT);
        if providers.is_empty() {
            tracing::debug!(phase = %request.phase, "No enhancement providers registered");
            return None;
        }
        let enhancement = request
            .clone()
            .for_phase(capability::ENHANCEMENT)
            .with_context(vec![summary.to_string()])
            .with_instruction(format!("Refine the {} findings above.", request.phase));
        self.fanout
            .call_all_cascading(
                &[providers],
                &enhancement,
                self.per_call_timeout,
                Some(phase_deadline),
            )
            .await
            .into_iter()
            .next()
    }

    fn fallback(
        &self,
        index: usize,
        phase: &PhaseConfig,
        reason: &str,
        outcomes: Vec<AttemptRecord>,
        started: Instant,
    ) -> IntelligenceLayer {
        let mut layer = IntelligenceLayer::fallback(
            index,
            &phase.name,
            &phase.data_type,
            self.scorer.reliability_floor(),
            reason,
        );
        layer.outcomes = outcomes;
        layer.processing_time_ms = duration_ms(started.elapsed());
        layer
    }
}

fn earliest(phase_deadline: Instant, operation_deadline: Option<Instant>) -> Instant {
    operation_deadline.map_or(phase_deadline, |deadline| deadline.min(phase_deadline))
}

fn context_lines(prior: &[IntelligenceLayer]) -> Vec<String> {
    prior
        .iter()
        .map(|layer| {
            format!(
                "{} ({}): {}",
                layer.name,
                layer.data_type,
                layer.summary.replace('\n', "; ")
            )
        })
        .collect()
}

/// Flattens outcomes into attempt records, earlier cascade attempts first.
fn audit_records(outcomes: &[CallOutcome]) -> Vec<AttemptRecord> {
    outcomes
        .iter()
        .flat_map(|outcome| {
            outcome
                .attempts
                .iter()
                .cloned()
                .chain(std::iter::once(AttemptRecord::from(outcome)))
        })
        .collect()
}
