//! Per-phase intelligence layers.

use super::{AttemptRecord, ProviderId};
use serde::{Deserialize, Serialize};

/// Source tag recorded on a layer that no real provider contributed to.
pub const FALLBACK_SOURCE: &str = "local-fallback";

/// Result of one pipeline phase.
///
/// Layers are immutable once created and owned by their operation. Later
/// phases receive earlier layers as read-only context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceLayer {
    /// Unique id within the operation, e.g. `L2-deep`.
    pub layer_id: String,
    /// Zero-based position in the pipeline.
    pub index: usize,
    /// Phase name.
    pub name: String,
    /// Data type tag declared by the phase.
    pub data_type: String,
    /// Provider ids that produced usable data, in slot order. Fallback
    /// substitutions appear under the id of the provider that answered.
    pub contributing_sources: Vec<ProviderId>,
    /// Layer reliability in `[0, 1]`.
    pub reliability: f64,
    /// Wall-clock time spent in the phase.
    pub processing_time_ms: u64,
    /// Whether an enhancement step refined this layer.
    pub enhanced: bool,
    /// Text assembled from the successful payloads.
    pub summary: String,
    /// Every attempt made during the phase.
    pub outcomes: Vec<AttemptRecord>,
    /// Set when no real provider contributed.
    pub fallback_only: bool,
}

impl IntelligenceLayer {
    /// Builds the layer id for a phase position.
    #[must_use]
    pub fn layer_id_for(index: usize, name: &str) -> String {
        format!("L{}-{name}", index + 1)
    }

    /// Creates a placeholder layer for a phase that produced nothing usable.
    #[must_use]
    pub fn fallback(
        index: usize,
        name: &str,
        data_type: &str,
        reliability_floor: f64,
        reason: &str,
    ) -> Self {
        Self {
            layer_id: Self::layer_id_for(index, name),
            index,
            name: name.to_string(),
            data_type: data_type.to_string(),
            contributing_sources: vec![ProviderId::from(FALLBACK_SOURCE)],
            reliability: reliability_floor,
            processing_time_ms: 0,
            enhanced: false,
            summary: format!("No live data for the {name} phase ({reason})."),
            outcomes: Vec::new(),
            fallback_only: true,
        }
    }

    /// Returns whether at least one real provider contributed.
    #[must_use]
    pub const fn has_real_source(&self) -> bool {
        !self.fallback_only
    }
}
