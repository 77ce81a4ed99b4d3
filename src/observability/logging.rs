//! Structured logging.

use crate::config::ObservabilitySettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Default filter when nothing else is configured.
const DEFAULT_FILTER: &str = "convergent=info,warn";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parses a format name, case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Level filter.
    pub filter: EnvFilter,
    /// Log file, or stderr when unset.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from settings with env overrides.
    ///
    /// `RUST_LOG` wins over the configured level, and `verbose` raises the
    /// crate's own level to debug when neither is set.
    #[must_use]
    pub fn from_settings(settings: Option<&ObservabilitySettings>, verbose: bool) -> Self {
        Self::from_settings_with(settings, verbose, |key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_settings`], reading variables through `lookup`.
    #[must_use]
    pub fn from_settings_with<F>(
        settings: Option<&ObservabilitySettings>,
        verbose: bool,
        lookup: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut format = settings
            .and_then(|s| s.log_format.as_deref())
            .and_then(LogFormat::parse)
            .unwrap_or_default();
        if let Some(value) = lookup("CONVERGENT_LOG_FORMAT") {
            if let Some(parsed) = LogFormat::parse(&value) {
                format = parsed;
            }
        }

        let mut file = settings.and_then(|s| s.log_file.clone());
        if let Some(value) = lookup("CONVERGENT_LOG_FILE") {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                file = Some(PathBuf::from(trimmed));
            }
        }

        let directive = lookup("RUST_LOG")
            .filter(|v| !v.trim().is_empty())
            .or_else(|| settings.and_then(|s| s.log_level.clone()))
            .unwrap_or_else(|| {
                if verbose {
                    "convergent=debug,info".to_string()
                } else {
                    DEFAULT_FILTER.to_string()
                }
            });
        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            tracing::warn!(directive = %directive, error = %err, "Invalid log filter, using default");
            EnvFilter::new(DEFAULT_FILTER)
        });

        Self {
            format,
            filter,
            file,
        }
    }
}
