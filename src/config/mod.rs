//! Configuration management.
//!
//! Configuration is layered: compiled defaults, then an optional TOML file,
//! then `CONVERGENT_*` environment variables.

use crate::models::{Provider, capability};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Phase deadline used when neither the phase nor the engine sets one.
pub const DEFAULT_PHASE_TIMEOUT_MS: u64 = 15_000;

/// Main configuration for the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    /// Deadline for a single provider call in milliseconds.
    pub per_call_timeout_ms: u64,
    /// Phase deadline used when a phase does not set its own.
    pub default_phase_timeout_ms: u64,
    /// Deadline for the whole synthesis cascade in milliseconds.
    pub synthesis_timeout_ms: u64,
    /// Optional deadline for a whole operation in milliseconds.
    pub operation_deadline_ms: Option<u64>,
    /// Maximum provider calls in flight per phase.
    pub max_concurrent_calls: usize,
    /// Entries kept per session.
    pub session_history_limit: usize,
    /// Seconds a terminal operation stays queryable.
    pub operation_ttl_secs: u64,
    /// Event bus buffer capacity.
    pub event_buffer: usize,
    /// Scoring constants.
    pub scoring: ScoringConfig,
    /// Circuit breaker settings applied to every provider.
    pub resilience: ResilienceConfig,
    /// Phases in execution order.
    pub phases: Vec<PhaseConfig>,
    /// Registered providers.
    pub providers: Vec<ProviderConfig>,
    /// Logging and metrics settings.
    pub observability: ObservabilitySettings,
    /// File the configuration was loaded from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Scoring constants.
///
/// Only monotonicity and the `[0, 1]` bound are guaranteed; the exact bonus
/// values are tunable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Upper bound of the source-diversity bonus.
    pub diversity_cap: f64,
    /// Fraction of the remaining bonus withheld per extra source.
    pub diversity_decay: f64,
    /// Bonus when an enhancement step refined the batch.
    pub enhancement_bonus: f64,
    /// Reliability assigned to a layer with no real source.
    pub reliability_floor: f64,
    /// Bonus added to the final confidence when a provider synthesized.
    pub synthesis_bonus: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            diversity_cap: 0.10,
            diversity_decay: 0.5,
            enhancement_bonus: 0.05,
            reliability_floor: 0.05,
            synthesis_bonus: 0.05,
        }
    }
}

impl ScoringConfig {
    /// Clamps every constant into a usable range.
    #[must_use]
    pub fn sanitized(self) -> Self {
        Self {
            diversity_cap: unit(self.diversity_cap),
            diversity_decay: unit(self.diversity_decay),
            enhancement_bonus: unit(self.enhancement_bonus),
            reliability_floor: unit(self.reliability_floor),
            synthesis_bonus: unit(self.synthesis_bonus),
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Consecutive failures before opening the circuit.
    pub breaker_failure_threshold: u32,
    /// How long to keep the circuit open before half-open.
    pub breaker_reset_ms: u64,
    /// Maximum trial calls while half-open.
    pub breaker_half_open_max_calls: u32,
    /// Latency budget in milliseconds; slower calls are counted.
    pub latency_slo_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            breaker_failure_threshold: 3,
            breaker_reset_ms: 30_000,
            breaker_half_open_max_calls: 1,
            latency_slo_ms: 2_000,
        }
    }
}

/// One pipeline phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Phase name, unique within the pipeline.
    pub name: String,
    /// Data type tag recorded on the layer.
    #[serde(default)]
    pub data_type: String,
    /// Capability a provider needs to take part in the phase.
    #[serde(default)]
    pub capability: String,
    /// Phase deadline in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Whether an enhancement cascade refines the phase output.
    #[serde(default)]
    pub enhance: bool,
}

impl PhaseConfig {
    /// Creates a phase whose data type and capability match its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            data_type: name.clone(),
            capability: name.clone(),
            name,
            timeout_ms: None,
            enhance: false,
        }
    }

    /// Sets the data type tag.
    #[must_use]
    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = data_type.into();
        self
    }

    /// Sets the required capability.
    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = capability.into();
        self
    }

    /// Sets the phase deadline.
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Enables the enhancement step.
    #[must_use]
    pub const fn with_enhancement(mut self, enhance: bool) -> Self {
        self.enhance = enhance;
        self
    }

    /// Returns the phase deadline, falling back to `default_ms`.
    #[must_use]
    pub fn timeout(&self, default_ms: u64) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(default_ms))
    }

    fn fill_blanks(&mut self) {
        if self.data_type.is_empty() {
            self.data_type.clone_from(&self.name);
        }
        if self.capability.is_empty() {
            self.capability.clone_from(&self.name);
        }
    }

    /// Returns the default four-phase pipeline.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("surface")
                .with_data_type("overview")
                .with_capability(capability::SURFACE),
            Self::new("deep")
                .with_data_type("analysis")
                .with_capability(capability::DEEP)
                .with_enhancement(true),
            Self::new("cross_validated")
                .with_data_type("validation")
                .with_capability(capability::CROSS_VALIDATION),
            Self::new("predictive")
                .with_data_type("forecast")
                .with_capability(capability::PREDICTIVE),
        ]
    }
}

/// Provider adapter kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Deterministic local source.
    #[default]
    Static,
    /// `OpenAI`-compatible chat completions endpoint.
    #[serde(alias = "openai_compatible")]
    OpenAi,
}

/// One registered provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique identifier.
    pub id: String,
    /// Adapter kind.
    #[serde(default)]
    pub kind: ProviderKind,
    /// Priority rank; lower values are tried first.
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Capability tags.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Nominal reliability in `[0, 1]`.
    #[serde(default = "default_reliability")]
    pub base_reliability: f64,
    /// Cascade group.
    #[serde(default)]
    pub group: Option<String>,
    /// Response template for static sources. Supports `{target}`,
    /// `{phase}` and `{provider}` placeholders.
    #[serde(default)]
    pub template: Option<String>,
    /// Simulated latency for static sources.
    #[serde(default)]
    pub latency_ms: Option<u64>,
    /// API base URL for HTTP providers.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Model name for HTTP providers.
    #[serde(default)]
    pub model: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Whether the provider sits behind a circuit breaker.
    #[serde(default = "default_true")]
    pub circuit_breaker: bool,
}

const fn default_priority() -> u32 {
    100
}

const fn default_reliability() -> f64 {
    0.5
}

const fn default_true() -> bool {
    true
}

impl ProviderConfig {
    /// Creates a static provider entry.
    #[must_use]
    pub fn new(id: impl Into<String>, priority: u32, base_reliability: f64) -> Self {
        Self {
            id: id.into(),
            kind: ProviderKind::Static,
            priority,
            capabilities: Vec::new(),
            base_reliability,
            group: None,
            template: None,
            latency_ms: None,
            endpoint: None,
            model: None,
            api_key_env: None,
            circuit_breaker: true,
        }
    }

    /// Sets the capability tags.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Sets the cascade group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Builds the provider descriptor.
    #[must_use]
    pub fn descriptor(&self) -> Provider {
        let provider = Provider::new(self.id.as_str(), self.priority, self.base_reliability)
            .with_capabilities(self.capabilities.iter().cloned());
        match &self.group {
            Some(group) => provider.with_group(group.clone()),
            None => provider,
        }
    }

    /// Returns the built-in demo providers.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("atlas", 10, 0.85)
                .with_capabilities(&[capability::SURFACE, capability::DEEP, capability::SYNTHESIS])
                .with_group("primary"),
            Self::new("atlas-mirror", 20, 0.7)
                .with_capabilities(&[capability::SURFACE, capability::DEEP])
                .with_group("primary"),
            Self::new("beacon", 15, 0.75).with_capabilities(&[
                capability::SURFACE,
                capability::CROSS_VALIDATION,
                capability::PREDICTIVE,
                capability::ENHANCEMENT,
            ]),
            Self::new("cipher", 30, 0.65).with_capabilities(&[
                capability::CROSS_VALIDATION,
                capability::PREDICTIVE,
                capability::SYNTHESIS,
            ]),
        ]
    }
}

/// Logging and metrics settings as they appear in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    /// Log level filter, e.g. `info` or `convergent=debug`.
    pub log_level: Option<String>,
    /// `pretty` or `json`.
    pub log_format: Option<String>,
    /// Log file path; stderr when unset.
    pub log_file: Option<PathBuf>,
    /// Whether the Prometheus recorder is installed.
    pub metrics_enabled: Option<bool>,
    /// Port for the Prometheus HTTP listener.
    pub metrics_port: Option<u16>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Engine section.
    pub engine: Option<ConfigFileEngine>,
    /// Scoring constants.
    pub scoring: Option<ScoringConfig>,
    /// Circuit breaker settings.
    pub resilience: Option<ResilienceConfig>,
    /// Observability settings.
    pub observability: Option<ObservabilitySettings>,
    /// Phases, replacing the defaults when present.
    #[serde(default, rename = "phase")]
    pub phases: Vec<PhaseConfig>,
    /// Providers, replacing the defaults when present.
    #[serde(default, rename = "provider")]
    pub providers: Vec<ProviderConfig>,
}

/// Engine section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileEngine {
    /// Per-call timeout.
    pub per_call_timeout_ms: Option<u64>,
    /// Default phase timeout.
    pub default_phase_timeout_ms: Option<u64>,
    /// Synthesis timeout.
    pub synthesis_timeout_ms: Option<u64>,
    /// Operation deadline.
    pub operation_deadline_ms: Option<u64>,
    /// Concurrency bound.
    pub max_concurrent_calls: Option<usize>,
    /// Session history length.
    pub session_history_limit: Option<usize>,
    /// Operation TTL.
    pub operation_ttl_secs: Option<u64>,
    /// Event bus capacity.
    pub event_buffer: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            per_call_timeout_ms: 5_000,
            default_phase_timeout_ms: DEFAULT_PHASE_TIMEOUT_MS,
            synthesis_timeout_ms: 10_000,
            operation_deadline_ms: None,
            max_concurrent_calls: 16,
            session_history_limit: 10,
            operation_ttl_secs: 3_600,
            event_buffer: 256,
            scoring: ScoringConfig::default(),
            resilience: ResilienceConfig::default(),
            phases: PhaseConfig::defaults(),
            providers: ProviderConfig::defaults(),
            observability: ObservabilitySettings::default(),
            source: None,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        let mut config = Self::from_toml(&contents)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for [`ConfigFile`].
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self::from_config_file(file))
    }

    /// Returns the default config file path for this platform.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "convergent")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads configuration from the default location.
    ///
    /// Returns default configuration if no config file is found or the file
    /// cannot be parsed.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Ignoring unreadable config file");
                Self::default()
            },
        }
    }

    /// Converts a `ConfigFile` to `EngineConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(engine) = file.engine {
            if let Some(v) = engine.per_call_timeout_ms {
                config.per_call_timeout_ms = v.max(1);
            }
            if let Some(v) = engine.default_phase_timeout_ms {
                config.default_phase_timeout_ms = v.max(1);
            }
            if let Some(v) = engine.synthesis_timeout_ms {
                config.synthesis_timeout_ms = v.max(1);
            }
            config.operation_deadline_ms = engine.operation_deadline_ms;
            if let Some(v) = engine.max_concurrent_calls {
                config.max_concurrent_calls = v.max(1);
            }
            if let Some(v) = engine.session_history_limit {
                config.session_history_limit = v;
            }
            if let Some(v) = engine.operation_ttl_secs {
                config.operation_ttl_secs = v;
            }
            if let Some(v) = engine.event_buffer {
                config.event_buffer = v.max(1);
            }
        }
        if let Some(scoring) = file.scoring {
            config.scoring = scoring.sanitized();
        }
        if let Some(resilience) = file.resilience {
            config.resilience = resilience;
        }
        if let Some(observability) = file.observability {
            config.observability = observability;
        }
        if !file.phases.is_empty() {
            config.phases = file.phases;
            for phase in &mut config.phases {
                phase.fill_blanks();
            }
        }
        if !file.providers.is_empty() {
            config.providers = file.providers;
        }

        config
    }

    /// Applies `CONVERGENT_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `CONVERGENT_PER_CALL_TIMEOUT_MS` | `per_call_timeout_ms` |
    /// | `CONVERGENT_PHASE_TIMEOUT_MS` | `default_phase_timeout_ms` |
    /// | `CONVERGENT_SYNTHESIS_TIMEOUT_MS` | `synthesis_timeout_ms` |
    /// | `CONVERGENT_OPERATION_DEADLINE_MS` | `operation_deadline_ms` |
    /// | `CONVERGENT_MAX_CONCURRENT_CALLS` | `max_concurrent_calls` |
    /// | `CONVERGENT_SESSION_HISTORY_LIMIT` | `session_history_limit` |
    /// | `CONVERGENT_OPERATION_TTL_SECS` | `operation_ttl_secs` |
    /// | `CONVERGENT_BREAKER_FAILURE_THRESHOLD` | `resilience.breaker_failure_threshold` |
    /// | `CONVERGENT_BREAKER_RESET_MS` | `resilience.breaker_reset_ms` |
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse_u64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let parse_usize = |key: &str| lookup(key).and_then(|v| v.trim().parse::<usize>().ok());

        if let Some(v) = parse_u64("CONVERGENT_PER_CALL_TIMEOUT_MS") {
            self.per_call_timeout_ms = v.max(1);
        }
        if let Some(v) = parse_u64("CONVERGENT_PHASE_TIMEOUT_MS") {
            self.default_phase_timeout_ms = v.max(1);
        }
        if let Some(v) = parse_u64("CONVERGENT_SYNTHESIS_TIMEOUT_MS") {
            self.synthesis_timeout_ms = v.max(1);
        }
        if let Some(v) = parse_u64("CONVERGENT_OPERATION_DEADLINE_MS") {
            self.operation_deadline_ms = (v > 0).then_some(v);
        }
        if let Some(v) = parse_usize("CONVERGENT_MAX_CONCURRENT_CALLS") {
            self.max_concurrent_calls = v.max(1);
        }
        if let Some(v) = parse_usize("CONVERGENT_SESSION_HISTORY_LIMIT") {
            self.session_history_limit = v;
        }
        if let Some(v) = parse_u64("CONVERGENT_OPERATION_TTL_SECS") {
            self.operation_ttl_secs = v;
        }
        if let Some(v) = lookup("CONVERGENT_BREAKER_FAILURE_THRESHOLD") {
            if let Ok(parsed) = v.trim().parse::<u32>() {
                self.resilience.breaker_failure_threshold = parsed.max(1);
            }
        }
        if let Some(v) = parse_u64("CONVERGENT_BREAKER_RESET_MS") {
            self.resilience.breaker_reset_ms = v;
        }

        self
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty pipeline, duplicate phase
    /// names or duplicate provider ids.
    pub fn validate(&self) -> Result<()> {
        if self.phases.is_empty() {
            return Err(Error::InvalidInput("at least one phase is required".to_string()));
        }
        let mut names = HashSet::new();
        for phase in &self.phases {
            if phase.name.trim().is_empty() {
                return Err(Error::InvalidInput("phase name must not be empty".to_string()));
            }
            if !names.insert(phase.name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate phase name '{}'",
                    phase.name
                )));
            }
        }
        let mut ids = HashSet::new();
        for provider in &self.providers {
            if !ids.insert(provider.id.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate provider id '{}'",
                    provider.id
                )));
            }
        }
        Ok(())
    }

    /// Returns the per-call deadline.
    #[must_use]
    pub const fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    /// Returns the synthesis deadline.
    #[must_use]
    pub const fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }

    /// Returns the operation deadline, if any.
    #[must_use]
    pub fn operation_deadline(&self) -> Option<Duration> {
        self.operation_deadline_ms.map(Duration::from_millis)
    }

    /// Returns the operation TTL.
    #[must_use]
    pub const fn operation_ttl(&self) -> Duration {
        Duration::from_secs(self.operation_ttl_secs)
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn with_per_call_timeout_ms(mut self, ms: u64) -> Self {
        self.per_call_timeout_ms = ms;
        self
    }

    /// Sets the operation deadline.
    #[must_use]
    pub const fn with_operation_deadline_ms(mut self, ms: Option<u64>) -> Self {
        self.operation_deadline_ms = ms;
        self
    }

    /// Replaces the phases.
    #[must_use]
    pub fn with_phases(mut self, phases: Vec<PhaseConfig>) -> Self {
        self.phases = phases;
        self
    }

    /// Replaces the providers.
    #[must_use]
    pub fn with_providers(mut self, providers: Vec<ProviderConfig>) -> Self {
        self.providers = providers;
        self
    }
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.phases.len(), 4);
        assert_eq!(config.session_history_limit, 10);
        assert!(config.operation_deadline().is_none());
    }

    #[test]
    fn test_parse_toml_sections() {
        let config = EngineConfig::from_toml(
            r#"
            [engine]
            per_call_timeout_ms = 250
            operation_deadline_ms = 4000

            [scoring]
            diversity_cap = 3.0

            [[phase]]
            name = "scan"
            timeout_ms = 900

            [[provider]]
            id = "local"
            priority = 1
            capabilities = ["scan", "synthesis"]
            base_reliability = 0.9
            "#,
        )
        .unwrap();

        assert_eq!(config.per_call_timeout_ms, 250);
        assert_eq!(config.operation_deadline_ms, Some(4000));
        assert!((config.scoring.diversity_cap - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.phases.len(), 1);
        assert_eq!(config.phases[0].capability, "scan");
        assert_eq!(config.phases[0].data_type, "scan");
        assert_eq!(config.phases[0].timeout(100), Duration::from_millis(900));
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].kind, ProviderKind::Static);
        assert!(config.providers[0].circuit_breaker);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nsession_history_limit = 3").unwrap();

        let config = EngineConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.session_history_limit, 3);
        assert_eq!(config.source.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = EngineConfig::load_from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(Error::OperationFailed { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CONVERGENT_PER_CALL_TIMEOUT_MS", "120"),
            ("CONVERGENT_OPERATION_DEADLINE_MS", "0"),
            ("CONVERGENT_MAX_CONCURRENT_CALLS", "0"),
            ("CONVERGENT_BREAKER_FAILURE_THRESHOLD", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = EngineConfig::default()
            .with_operation_deadline_ms(Some(10))
            .with_overrides_from(|key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.per_call_timeout_ms, 120);
        assert_eq!(config.operation_deadline_ms, None);
        assert_eq!(config.max_concurrent_calls, 1);
        assert_eq!(config.resilience.breaker_failure_threshold, 3);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let config = EngineConfig::default()
            .with_phases(vec![PhaseConfig::new("a"), PhaseConfig::new("a")]);
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));

        let config = EngineConfig::default().with_providers(vec![
            ProviderConfig::new("p", 1, 0.5),
            ProviderConfig::new("p", 2, 0.5),
        ]);
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));

        let config = EngineConfig::default().with_phases(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_descriptor() {
        let provider = ProviderConfig::new("x", 7, 0.4)
            .with_capabilities(&["surface"])
            .with_group("g")
            .descriptor();
        assert_eq!(provider.priority, 7);
        assert!(provider.has_capability("surface"));
        assert_eq!(provider.slot_key(), "g");
    }
}
