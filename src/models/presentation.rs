//! Closed presentation configuration for synthesis.
//!
//! Callers may send arbitrary strings; anything unrecognized normalizes to the
//! default for that field instead of reaching the template or a provider.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How much detail the narrative carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// One short paragraph.
    Concise,
    /// One paragraph per layer.
    #[default]
    Detailed,
    /// Per-layer detail plus sources and reliability.
    Comprehensive,
}

impl Verbosity {
    /// Returns the verbosity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Concise => "concise",
            Self::Detailed => "detailed",
            Self::Comprehensive => "comprehensive",
        }
    }

    /// Parses a verbosity, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "concise" | "brief" => Some(Self::Concise),
            "detailed" => Some(Self::Detailed),
            "comprehensive" | "full" => Some(Self::Comprehensive),
            _ => None,
        }
    }
}

/// Layout of the narrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Structure {
    /// Continuous prose.
    Flat,
    /// One headed section per layer.
    #[default]
    Sectioned,
}

impl Structure {
    /// Returns the structure as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Sectioned => "sectioned",
        }
    }

    /// Parses a structure, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "flat" => Some(Self::Flat),
            "sectioned" | "sections" => Some(Self::Sectioned),
            _ => None,
        }
    }
}

/// Register of the narrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    /// Plain reporting.
    #[default]
    Neutral,
    /// Direct conclusions.
    Assertive,
    /// Includes scores and provider ids inline.
    Technical,
}

impl Tone {
    /// Returns the tone as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Assertive => "assertive",
            Self::Technical => "technical",
        }
    }

    /// Parses a tone, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "neutral" => Some(Self::Neutral),
            "assertive" => Some(Self::Assertive),
            "technical" => Some(Self::Technical),
            _ => None,
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(Verbosity, Structure, Tone);

/// Unvalidated presentation input as it arrives from callers or config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPresentation {
    /// Requested verbosity.
    pub verbosity: Option<String>,
    /// Requested structure.
    pub structure: Option<String>,
    /// Requested tone.
    pub tone: Option<String>,
}

/// Validated presentation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawPresentation")]
pub struct PresentationConfig {
    /// Detail level.
    pub verbosity: Verbosity,
    /// Layout.
    pub structure: Structure,
    /// Register.
    pub tone: Tone,
}

impl PresentationConfig {
    /// Sets the verbosity.
    #[must_use]
    pub const fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Sets the structure.
    #[must_use]
    pub const fn with_structure(mut self, structure: Structure) -> Self {
        self.structure = structure;
        self
    }

    /// Sets the tone.
    #[must_use]
    pub const fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = tone;
        self
    }

    /// Builds a config from loose strings, falling back per field.
    #[must_use]
    pub fn normalize(verbosity: Option<&str>, structure: Option<&str>, tone: Option<&str>) -> Self {
        Self {
            verbosity: parse_or_default("verbosity", verbosity, Verbosity::parse),
            structure: parse_or_default("structure", structure, Structure::parse),
            tone: parse_or_default("tone", tone, Tone::parse),
        }
    }

    /// Renders the settings as an instruction for a synthesis provider.
    #[must_use]
    pub fn instruction(&self) -> String {
        format!(
            "Write a {} answer, {} layout, {} tone.",
            self.verbosity, self.structure, self.tone
        )
    }
}

impl From<RawPresentation> for PresentationConfig {
    fn from(raw: RawPresentation) -> Self {
        Self::normalize(
            raw.verbosity.as_deref(),
            raw.structure.as_deref(),
            raw.tone.as_deref(),
        )
    }
}

fn parse_or_default<T: Default>(
    field: &'static str,
    value: Option<&str>,
    parse: impl Fn(&str) -> Option<T>,
) -> T {
    let Some(value) = value else {
        return T::default();
    };
    parse(value).unwrap_or_else(|| {
        tracing::warn!(field, value, "Unrecognized presentation value, using default");
        T::default()
    })
}
