//! Engine facade.
//!
//! Owns the registry, the pipeline, synthesis, operation tracking and session
//! memory, and runs one operation end to end per call. The engine is `Send +
//! Sync`; share it behind an `Arc` to run operations concurrently.

use super::fanout::FanOutAggregator;
use super::pipeline::LayeredPipeline;
use super::scoring::ReliabilityScorer;
use super::session::SessionMemory;
use super::synthesis::ResponseSynthesizer;
use super::tracker::OperationTracker;
use crate::config::EngineConfig;
use crate::models::{
    ConsolidatedResult, EventMeta, IntelligenceLayer, Operation, OperationId, OperationStatus,
    PipelineEvent, PresentationConfig, SessionEntry, duration_ms,
};
use crate::observability::{EventBus, OperationContext, scope_operation_context};
use crate::providers::{ProviderRegistry, ProviderRequest};
use crate::storage::{InMemoryOperationStore, InMemorySessionStore, OperationStore, SessionStore};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

const EVENT_SOURCE: &str = "engine";

/// Characters of the narrative remembered per session entry.
const SESSION_SUMMARY_LIMIT: usize = 160;

/// Per-call options for [`Engine::run_pipeline_with`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Session whose history is supplied as context and extended afterwards.
    pub session_id: Option<String>,
    /// Deadline for this operation, overriding the configured one.
    pub deadline: Option<Duration>,
}

impl RunOptions {
    /// Binds the run to a session.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the operation deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// The tracked operation.
    pub operation_id: OperationId,
    /// Terminal status.
    pub status: OperationStatus,
    /// Final result.
    pub result: ConsolidatedResult,
    /// One layer per phase.
    pub layers: Vec<IntelligenceLayer>,
}

impl PipelineRun {
    /// Confidence percentage.
    #[must_use]
    pub const fn confidence_score(&self) -> f64 {
        self.result.confidence_score
    }

    /// Whether the result is degraded.
    #[must_use]
    pub const fn degraded(&self) -> bool {
        self.result.degraded
    }
}

/// Runs the layered pipeline and synthesis for callers.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<ProviderRegistry>,
    pipeline: LayeredPipeline,
    synthesizer: ResponseSynthesizer,
    tracker: OperationTracker,
    sessions: SessionMemory,
    events: EventBus,
}

impl Engine {
    /// Builds an engine from configuration, with in-memory stores.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the configuration is invalid.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let registry = ProviderRegistry::from_config(&config.providers, &config.resilience)?;
        Self::new(config, registry)
    }

    /// Builds an engine over an existing registry, with in-memory stores.
    ///
    /// The registry's providers replace those listed in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the phase configuration is invalid.
    pub fn new(config: EngineConfig, registry: ProviderRegistry) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(registry);
        let scorer = ReliabilityScorer::new(config.scoring);
        let pipeline = LayeredPipeline::new(Arc::clone(&registry), config.phases.clone())
            .with_fanout(FanOutAggregator::new(config.max_concurrent_calls))
            .with_scorer(scorer)
            .with_per_call_timeout(config.per_call_timeout())
            .with_default_phase_timeout_ms(config.default_phase_timeout_ms);
        let synthesizer = ResponseSynthesizer::new(
            Arc::clone(&registry),
            scorer,
            config.per_call_timeout(),
            config.synthesis_timeout(),
        );
        let operations: Arc<dyn OperationStore> = Arc::new(InMemoryOperationStore::new());
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());

        tracing::debug!(
            providers = registry.len(),
            phases = config.phases.len(),
            "Engine initialized"
        );

        Ok(Self {
            tracker: OperationTracker::new(operations),
            sessions: SessionMemory::new(sessions, config.session_history_limit),
            events: EventBus::new(config.event_buffer),
            registry,
            pipeline,
            synthesizer,
            config,
        })
    }

    /// Replaces the operation and session stores.
    #[must_use]
    pub fn with_stores(
        mut self,
        operations: Arc<dyn OperationStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        self.tracker = OperationTracker::new(operations);
        self.sessions = SessionMemory::new(sessions, self.config.session_history_limit);
        self
    }

    /// Replaces the event bus.
    #[must_use]
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the provider registry.
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Returns the event bus.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Returns the session memory.
    #[must_use]
    pub const fn sessions(&self) -> &SessionMemory {
        &self.sessions
    }

    /// Returns the operation tracker.
    #[must_use]
    pub const fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    /// Runs one operation without a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty target. Provider
    /// failures never surface here; they degrade the result instead.
    pub async fn run_pipeline(
        &self,
        target: &str,
        requirements: &[String],
        presentation: PresentationConfig,
    ) -> Result<PipelineRun> {
        self.run_pipeline_with(target, requirements, presentation, RunOptions::default())
            .await
    }

    /// Runs one operation with per-call options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty target, or a store error
    /// if the operation cannot be registered. Store failures after that are
    /// logged and never fail the run.
    pub async fn run_pipeline_with(
        &self,
        target: &str,
        requirements: &[String],
        presentation: PresentationConfig,
        options: RunOptions,
    ) -> Result<PipelineRun> {
        let target = target.trim();
        if target.is_empty() {
            return Err(Error::InvalidInput("target must not be empty".to_string()));
        }

        if let Err(err) = self.tracker.purge_expired(self.config.operation_ttl()) {
            tracing::warn!(error = %err, "Failed to purge expired operations");
        }

        let started = Instant::now();
        let operation_id = self
            .tracker
            .start_with_session(target, options.session_id.clone())?;
        let span = tracing::info_span!(
            "pipeline.operation",
            operation_id = %operation_id,
            session_id = options.session_id.as_deref().unwrap_or("-"),
            status = tracing::field::Empty,
            confidence = tracing::field::Empty
        );
        let context = OperationContext::new(operation_id.clone())
            .with_session(options.session_id.clone());

        let run = scope_operation_context(
            context,
            self.execute(&operation_id, target, requirements, presentation, &options, started)
                .instrument(span),
        )
        .await;

        let status = run.status.as_str();
        metrics::counter!("pipeline_operations_total", "status" => status).increment(1);
        metrics::histogram!("pipeline_duration_ms", "status" => status)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        Ok(run)
    }

    /// Returns a snapshot of a tracked operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOperation`] for ids never issued or already
    /// purged.
    pub fn operation_status(&self, id: &OperationId) -> Result<Operation> {
        self.tracker.get(id)
    }

    async fn execute(
        &self,
        operation_id: &OperationId,
        target: &str,
        requirements: &[String],
        presentation: PresentationConfig,
        options: &RunOptions,
        started: Instant,
    ) -> PipelineRun {
        self.events.publish(PipelineEvent::OperationStarted {
            meta: self.meta(operation_id),
            operation_id: operation_id.clone(),
            phases: self.pipeline.phases().len(),
        });
        if let Err(err) = self.tracker.mark_running(operation_id) {
            store_warning("mark_running", &err);
        }

        let session_context = match &options.session_id {
            Some(session_id) => self.sessions.context_for(session_id).unwrap_or_else(|err| {
                store_warning("session_context", &err);
                Vec::new()
            }),
            None => Vec::new(),
        };
        let base = ProviderRequest::new(target)
            .with_requirements(requirements.to_vec())
            .with_session_context(session_context)
            .with_operation(operation_id.clone());
        let deadline = options
            .deadline
            .or_else(|| self.config.operation_deadline())
            .map(|deadline| started + deadline);

        let mut layers_lost = false;
        let produced = self
            .pipeline
            .run(&base, deadline, |layer| {
                if let Err(err) = self.tracker.record_layer(operation_id, layer.clone()) {
                    store_warning("record_layer", &err);
                    layers_lost = true;
                }
                self.events.publish(PipelineEvent::PhaseCompleted {
                    meta: self.meta(operation_id),
                    operation_id: operation_id.clone(),
                    phase: layer.name.clone(),
                    reliability: layer.reliability,
                    fallback_only: layer.fallback_only,
                });
            })
            .await;

        let synthesis = self
            .synthesizer
            .synthesize_until(&base, &produced.layers, presentation, deadline)
            .await;
        if synthesis.fell_back() {
            self.events.publish(PipelineEvent::SynthesisFallback {
                meta: self.meta(operation_id),
                operation_id: operation_id.clone(),
                attempts: synthesis.attempted,
            });
        }
        let result = synthesis.result;

        // A layer missing from the record makes the stored operation partial,
        // and fail_partial rewrites the full layer list.
        let status = if layers_lost {
            OperationStatus::PartiallyFailed
        } else {
            produced.status
        };
        let recorded = if status == OperationStatus::Completed {
            self.tracker.complete(operation_id, result.clone())
        } else {
            self.tracker
                .fail_partial(operation_id, produced.layers.clone(), result.clone())
        };
        if let Err(err) = recorded {
            store_warning("finish", &err);
        }

        if let Some(session_id) = &options.session_id {
            if let Err(err) = self.remember(session_id, target, &result, presentation) {
                store_warning("session_update", &err);
            }
        }

        let span = tracing::Span::current();
        span.record("status", status.as_str());
        span.record("confidence", result.confidence_score);
        let elapsed = duration_ms(started.elapsed());
        tracing::info!(
            status = %status,
            confidence = result.confidence_score,
            degraded = result.degraded,
            synthesized_by = %result.synthesized_by,
            duration_ms = elapsed,
            "Operation finished"
        );
        self.events.publish(PipelineEvent::OperationFinished {
            meta: self.meta(operation_id),
            operation_id: operation_id.clone(),
            status,
            confidence_score: result.confidence_score,
            duration_ms: elapsed,
        });

        PipelineRun {
            operation_id: operation_id.clone(),
            status,
            result,
            layers: produced.layers,
        }
    }

    fn remember(
        &self,
        session_id: &str,
        target: &str,
        result: &ConsolidatedResult,
        presentation: PresentationConfig,
    ) -> Result<()> {
        let summary = result.narrative.lines().next().unwrap_or_default();
        let summary: String = summary.chars().take(SESSION_SUMMARY_LIMIT).collect();
        self.sessions.append(
            session_id,
            SessionEntry::new(target, summary, result.confidence_score),
        )?;
        self.sessions
            .tag(session_id, "verbosity", presentation.verbosity.as_str())?;
        self.sessions.tag(session_id, "tone", presentation.tone.as_str())?;
        self.sessions.tag(session_id, "last_target", target)
    }

    fn meta(&self, operation_id: &OperationId) -> EventMeta {
        EventMeta::new(EVENT_SOURCE, Some(operation_id.to_string()))
    }
}

/// Logs and counts a store failure that must not abort a running operation.
fn store_warning(operation: &'static str, err: &Error) {
    tracing::warn!(operation, error = %err, "Store update failed; continuing");
    metrics::counter!("store_errors_total", "operation" => operation).increment(1);
}
