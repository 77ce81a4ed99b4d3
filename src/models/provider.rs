//! Provider descriptors and identifiers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Well-known capability tags consulted during provider selection.
pub mod capability {
    /// First-pass, broad collection.
    pub const SURFACE: &str = "surface";
    /// Detailed follow-up collection.
    pub const DEEP: &str = "deep";
    /// Independent confirmation of earlier findings.
    pub const CROSS_VALIDATION: &str = "cross_validation";
    /// Forward-looking analysis.
    pub const PREDICTIVE: &str = "predictive";
    /// Merges layers into a final narrative.
    pub const SYNTHESIS: &str = "synthesis";
    /// Refines a single phase's raw findings.
    pub const ENHANCEMENT: &str = "enhancement";
}

/// Unique identifier for a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Creates a new provider ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProviderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Static description of an upstream provider.
///
/// Loaded once at startup and never mutated. The capability set is used only
/// to select providers for a phase, never to negotiate request shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    /// Unique identifier.
    pub id: ProviderId,
    /// Priority rank; lower values are tried first.
    pub priority: u32,
    /// Declared capability tags.
    pub capabilities: BTreeSet<String>,
    /// Nominal reliability weight in `[0, 1]`.
    pub base_reliability: f64,
    /// Cascade group. Providers sharing a group within a phase are tried as
    /// one primary-plus-fallbacks slot.
    pub group: Option<String>,
}

impl Provider {
    /// Creates a provider with no capabilities.
    ///
    /// `base_reliability` is clamped to `[0, 1]`; NaN becomes 0.
    #[must_use]
    pub fn new(id: impl Into<ProviderId>, priority: u32, base_reliability: f64) -> Self {
        Self {
            id: id.into(),
            priority,
            capabilities: BTreeSet::new(),
            base_reliability: clamp_unit(base_reliability),
            group: None,
        }
    }

    /// Adds a capability tag.
    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Adds several capability tags.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Places the provider in a cascade group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Returns whether the provider declares a capability.
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Returns the key used to group providers into cascade slots.
    #[must_use]
    pub fn slot_key(&self) -> &str {
        self.group.as_deref().unwrap_or_else(|| self.id.as_str())
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

    #[test]
    fn test_reliability_is_clamped() {
        assert!((Provider::new("a", 1, 1.7).base_reliability - 1.0).abs() < f64::EPSILON);
        assert!(Provider::new("b", 1, -0.3).base_reliability.abs() < f64::EPSILON);
        assert!(Provider::new("c", 1, f64::NAN).base_reliability.abs() < f64::EPSILON);
    }

    #[test]
    fn test_slot_key_defaults_to_id() {
        let solo = Provider::new("solo", 1, 0.5);
        assert_eq!(solo.slot_key(), "solo");

        let grouped = Provider::new("backup", 2, 0.5).with_group("search");
        assert_eq!(grouped.slot_key(), "search");
    }

    #[test]
    fn test_capabilities() {
        let provider = Provider::new("p", 1, 0.8)
            .with_capability(capability::SURFACE)
            .with_capabilities([capability::DEEP, capability::SYNTHESIS]);
        assert!(provider.has_capability("surface"));
        assert!(provider.has_capability("synthesis"));
        assert!(!provider.has_capability("predictive"));
    }
}
