//! Final narrative synthesis.
//!
//! Synthesis-capable providers are tried in priority order. When all of them
//! fail (or none exist) the narrative is rendered by a deterministic local
//! template, so a result is always produced.

use super::cascade::CascadeExecutor;
use super::scoring::ReliabilityScorer;
use crate::Error;
use crate::models::{
    ConsolidatedResult, FALLBACK_SOURCE, IntelligenceLayer, LOCAL_TEMPLATE, PresentationConfig,
    ProviderId, Structure, Tone, Verbosity, capability,
};
use crate::providers::{ProviderRegistry, ProviderRequest};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;

/// Characters kept per layer in a concise narrative.
const CONCISE_LIMIT: usize = 200;

/// Result of a synthesis pass.
#[derive(Debug, Clone)]
pub struct Synthesis {
    /// The consolidated result.
    pub result: ConsolidatedResult,
    /// Synthesis providers that were available to try.
    pub attempted: usize,
}

impl Synthesis {
    /// Returns whether the local template wrote the narrative.
    #[must_use]
    pub fn fell_back(&self) -> bool {
        self.result.synthesized_by == LOCAL_TEMPLATE
    }
}

/// Turns layers into the caller-facing result.
pub struct ResponseSynthesizer {
    registry: Arc<ProviderRegistry>,
    cascade: CascadeExecutor,
    scorer: ReliabilityScorer,
    timeout: Duration,
}

impl ResponseSynthesizer {
    /// Creates a synthesizer.
    ///
    /// `per_call_timeout` bounds each provider attempt; `timeout` bounds the
    /// whole provider cascade.
    #[must_use]
    pub const fn new(
        registry: Arc<ProviderRegistry>,
        scorer: ReliabilityScorer,
        per_call_timeout: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cascade: CascadeExecutor::new(per_call_timeout),
            scorer,
            timeout,
        }
    }

    /// Produces the consolidated result for `layers`.
    ///
    /// Never fails: provider failures fall back to the local template and
    /// mark the result degraded.
    pub async fn synthesize(
        &self,
        base: &ProviderRequest,
        layers: &[IntelligenceLayer],
        presentation: PresentationConfig,
    ) -> Synthesis {
        self.synthesize_until(base, layers, presentation, None).await
    }

    /// Like [`Self::synthesize`], but the provider cascade also stops at
    /// `deadline` when that comes before the synthesis timeout.
    #[instrument(
        skip_all,
        fields(
            layers = layers.len(),
            verbosity = %presentation.verbosity,
            synthesized_by = tracing::field::Empty
        )
    )]
    pub async fn synthesize_until(
        &self,
        base: &ProviderRequest,
        layers: &[IntelligenceLayer],
        presentation: PresentationConfig,
        deadline: Option<Instant>,
    ) -> Synthesis {
        let budget = deadline.map_or(self.timeout, |deadline| {
            deadline
                .saturating_duration_since(Instant::now())
                .min(self.timeout)
        });
        let providers = self.registry.with_capability(capability::SYNTHESIS);
        let attempted = providers.len();

        let provided = if providers.is_empty() {
            None
        } else {
            let request = base
                .clone()
                .for_phase(capability::SYNTHESIS)
                .with_context(layer_lines(layers))
                .with_instruction(presentation.instruction());
            match tokio::time::timeout(
                budget,
                self.cascade.try_in_priority_order(&providers, &request),
            )
            .await
            {
                Ok(outcome) if outcome.is_success() => outcome
                    .summary()
                    .filter(|text| !text.trim().is_empty())
                    .map(|text| (text, outcome.provider_id)),
                Ok(outcome) => {
                    tracing::debug!(
                        error = outcome.error.as_deref().unwrap_or(""),
                        "Synthesis cascade failed"
                    );
                    None
                },
                Err(_) => {
                    tracing::debug!(timeout_ms = budget.as_millis(), "Synthesis timed out");
                    None
                },
            }
        };

        let (narrative, synthesized_by) = if let Some((text, provider)) = provided {
            (text, provider.to_string())
        } else {
            let err = Error::SynthesisFailure {
                attempts: attempted,
            };
            tracing::warn!(error = %err, "Falling back to local template");
            metrics::counter!("synthesis_fallback_total").increment(1);
            (
                render_local_template(&base.target, layers, presentation),
                LOCAL_TEMPLATE.to_string(),
            )
        };
        tracing::Span::current().record("synthesized_by", synthesized_by.as_str());

        let synthesized = synthesized_by != LOCAL_TEMPLATE;
        let degraded = !synthesized || layers.iter().any(|l| l.fallback_only);
        let result = ConsolidatedResult {
            narrative,
            confidence_score: self.scorer.confidence_score(layers, synthesized),
            sources_used: sources_used(layers),
            degraded,
            synthesized_by,
        };

        Synthesis { result, attempted }
    }
}

/// Distinct real providers across all layers, in first-seen order.
#[must_use]
pub fn sources_used(layers: &[IntelligenceLayer]) -> Vec<ProviderId> {
    let mut sources: Vec<ProviderId> = Vec::new();
    for source in layers.iter().flat_map(|l| l.contributing_sources.iter()) {
        if source.as_str() != FALLBACK_SOURCE && !sources.contains(source) {
            sources.push(source.clone());
        }
    }
    sources
}

fn layer_lines(layers: &[IntelligenceLayer]) -> Vec<String> {
    layers
        .iter()
        .map(|layer| {
            format!(
                "{} (reliability {:.2}): {}",
                layer.name,
                layer.reliability,
                layer.summary.replace('\n', "; ")
            )
        })
        .collect()
}

/// Renders a narrative from layers without any provider.
///
/// Deterministic for the same input and never empty.
#[must_use]
pub fn render_local_template(
    target: &str,
    layers: &[IntelligenceLayer],
    presentation: PresentationConfig,
) -> String {
    let target = match target.trim() {
        "" => "the request",
        trimmed => trimmed,
    };
    let mut out = opening(target, layers, presentation.tone);
    if layers.is_empty() {
        out.push_str(" No findings were available.");
        return out;
    }

    for layer in layers {
        let heading = heading(layer, presentation.tone);
        let body = body(layer, presentation);
        match presentation.structure {
            Structure::Sectioned => {
                let _ = write!(out, "\n\n## {heading}\n{body}");
            },
            Structure::Flat => {
                let _ = write!(out, " {heading}: {body}");
            },
        }
    }
    out
}

fn opening(target: &str, layers: &[IntelligenceLayer], tone: Tone) -> String {
    match tone {
        Tone::Neutral => format!("Findings for {target}."),
        Tone::Assertive => format!("Here is what is known about {target}."),
        Tone::Technical => {
            let mean = if layers.is_empty() {
                0.0
            } else {
                layers.iter().map(|l| l.reliability).sum::<f64>() / layers.len() as f64
            };
            format!(
                "Aggregated findings for {target}: {} layer(s), mean reliability {mean:.2}.",
                layers.len()
            )
        },
    }
}

fn heading(layer: &IntelligenceLayer, tone: Tone) -> String {
    let name = capitalize(&layer.name);
    match tone {
        Tone::Technical => format!(
            "{name} [{}, reliability {:.2}, providers {}]",
            layer.data_type,
            layer.reliability,
            source_list(layer)
        ),
        Tone::Neutral | Tone::Assertive => name,
    }
}

fn body(layer: &IntelligenceLayer, presentation: PresentationConfig) -> String {
    let separator = match presentation.structure {
        Structure::Sectioned => "\n",
        Structure::Flat => " ",
    };
    match presentation.verbosity {
        Verbosity::Concise => {
            let first = layer.summary.lines().next().unwrap_or_default().trim();
            truncate(first, CONCISE_LIMIT)
        },
        Verbosity::Detailed => join_lines(&layer.summary, separator),
        Verbosity::Comprehensive => {
            let sources = source_list(layer);
            let mut text = join_lines(&layer.summary, separator);
            let _ = write!(
                text,
                "{separator}Sources: {sources}. Reliability {:.2}.",
                layer.reliability
            );
            if layer.enhanced {
                text.push_str(" Enhanced.");
            }
            text
        },
    }
}

fn source_list(layer: &IntelligenceLayer) -> String {
    if layer.fallback_only {
        return "none".to_string();
    }
    layer
        .contributing_sources
        .iter()
        .map(ProviderId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_lines(text: &str, separator: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars.map(|c| if c == '_' { ' ' } else { c })).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provider;
    use crate::providers::{ProviderClient, StaticSource};
    use test_case::test_case;

    fn layer(name: &str, summary: &str, reliability: f64, sources: &[&str]) -> IntelligenceLayer {
        IntelligenceLayer {
            layer_id: IntelligenceLayer::layer_id_for(0, name),
            index: 0,
            name: name.to_string(),
            data_type: "overview".to_string(),
            contributing_sources: sources.iter().map(|s| ProviderId::from(*s)).collect(),
            reliability,
            processing_time_ms: 1,
            enhanced: false,
            summary: summary.to_string(),
            outcomes: Vec::new(),
            fallback_only: false,
        }
    }

    fn layers() -> Vec<IntelligenceLayer> {
        vec![
            layer("surface", "first line\nsecond line", 0.8, &["a", "b"]),
            layer("cross_validated", "checked", 0.6, &["b"]),
        ]
    }

    fn synthesizer(entries: Vec<(Provider, StaticSource)>) -> ResponseSynthesizer {
        let registry = entries
            .into_iter()
            .try_fold(ProviderRegistry::new(), |registry, (descriptor, source)| {
                let client: Arc<dyn ProviderClient> = Arc::new(source);
                registry.register(descriptor, client)
            })
            .unwrap();
        ResponseSynthesizer::new(
            Arc::new(registry),
            ReliabilityScorer::default(),
            Duration::from_millis(50),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_provider_synthesis() {
        let synth = synthesizer(vec![(
            Provider::new("s", 1, 0.9).with_capability(capability::SYNTHESIS),
            StaticSource::new("s").with_template("narrative about {target}"),
        )]);
        let out = synth
            .synthesize(&ProviderRequest::new("rust"), &layers(), PresentationConfig::default())
            .await;

        assert!(!out.fell_back());
        assert_eq!(out.result.narrative, "narrative about rust");
        assert_eq!(out.result.synthesized_by, "s");
        assert!(!out.result.degraded);
        assert_eq!(
            out.result.sources_used,
            vec![ProviderId::from("a"), ProviderId::from("b")]
        );
        assert!((out.result.confidence_score - 75.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_falls_back_when_all_fail() {
        let synth = synthesizer(vec![
            (
                Provider::new("s1", 1, 0.9).with_capability(capability::SYNTHESIS),
                StaticSource::failing("s1", "down"),
            ),
            (
                Provider::new("s2", 2, 0.9).with_capability(capability::SYNTHESIS),
                StaticSource::hanging("s2"),
            ),
        ]);
        let out = synth
            .synthesize(&ProviderRequest::new("rust"), &layers(), PresentationConfig::default())
            .await;

        assert!(out.fell_back());
        assert_eq!(out.attempted, 2);
        assert!(out.result.degraded);
        assert_eq!(out.result.synthesized_by, LOCAL_TEMPLATE);
        assert!(!out.result.narrative.is_empty());
        assert!((out.result.confidence_score - 70.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_synthesis_providers() {
        let synth = synthesizer(Vec::new());
        let out = synth
            .synthesize(&ProviderRequest::new("rust"), &[], PresentationConfig::default())
            .await;

        assert!(out.fell_back());
        assert_eq!(out.attempted, 0);
        assert_eq!(out.result.narrative, "Findings for rust. No findings were available.");
        assert!(out.result.confidence_score.abs() < 1e-9);
    }

    #[test]
    fn test_template_is_deterministic() {
        let config = PresentationConfig::default().with_tone(Tone::Technical);
        assert_eq!(
            render_local_template("rust", &layers(), config),
            render_local_template("rust", &layers(), config)
        );
    }

    #[test]
    fn test_sectioned_layout() {
        let text = render_local_template("rust", &layers(), PresentationConfig::default());
        assert!(text.starts_with("Findings for rust."));
        assert!(text.contains("\n\n## Surface\nfirst line\nsecond line"));
        assert!(text.contains("## Cross validated\nchecked"));
    }

    #[test]
    fn test_flat_layout_is_single_paragraph() {
        let config = PresentationConfig::default().with_structure(Structure::Flat);
        let text = render_local_template("rust", &layers(), config);
        assert!(!text.contains('\n'));
        assert!(text.contains("Surface: first line second line"));
    }

    #[test_case(Verbosity::Concise, "first line", "second line" ; "concise keeps first line")]
    #[test_case(Verbosity::Detailed, "second line", "Sources:" ; "detailed omits sources")]
    #[test_case(Verbosity::Comprehensive, "Sources: a, b. Reliability 0.80.", "Enhanced." ; "comprehensive lists sources")]
    fn test_verbosity(verbosity: Verbosity, present: &str, absent: &str) {
        let config = PresentationConfig::default().with_verbosity(verbosity);
        let text = render_local_template("rust", &layers(), config);
        assert!(text.contains(present), "{text}");
        assert!(!text.contains(absent), "{text}");
    }

    #[test]
    fn test_technical_tone_includes_scores() {
        let config = PresentationConfig::default().with_tone(Tone::Technical);
        let text = render_local_template("rust", &layers(), config);
        assert!(text.contains("mean reliability 0.70"));
        assert!(text.contains("Surface [overview, reliability 0.80, providers a, b]"));
        assert!(text.contains("Cross validated [overview, reliability 0.60, providers b]"));
    }

    #[test]
    fn test_technical_tone_marks_fallback_layers() {
        let fallback = IntelligenceLayer::fallback(1, "deep", "analysis", 0.05, "none");
        let config = PresentationConfig::default().with_tone(Tone::Technical);
        let text = render_local_template("rust", &[fallback], config);
        assert!(text.contains("Deep [analysis, reliability 0.05, providers none]"), "{text}");
    }

    #[tokio::test]
    async fn test_operation_deadline_bounds_synthesis() {
        let synth = synthesizer(vec![(
            Provider::new("slow", 1, 0.9).with_capability(capability::SYNTHESIS),
            StaticSource::hanging("slow"),
        )]);
        let started = Instant::now();
        let out = synth
            .synthesize_until(
                &ProviderRequest::new("rust"),
                &layers(),
                PresentationConfig::default(),
                Some(started + Duration::from_millis(30)),
            )
            .await;

        assert!(out.fell_back());
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_blank_target_still_renders() {
        let text = render_local_template("  ", &[], PresentationConfig::default());
        assert_eq!(text, "Findings for the request. No findings were available.");
    }

    #[test]
    fn test_sources_used_skips_fallback() {
        let fallback = IntelligenceLayer::fallback(1, "deep", "analysis", 0.05, "none");
        let sources = sources_used(&[layer("surface", "x", 0.8, &["a"]), fallback]);
        assert_eq!(sources, vec![ProviderId::from("a")]);
    }
}
