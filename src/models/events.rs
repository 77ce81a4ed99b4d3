//! Pipeline event types for observers.

use super::{OperationId, OperationStatus};
use crate::current_timestamp;
use uuid::Uuid;

/// Shared event metadata.
#[derive(Debug, Clone)]
pub struct EventMeta {
    /// Unique identifier for this event.
    pub event_id: String,
    /// Optional correlation identifier for request/trace linking.
    pub correlation_id: Option<String>,
    /// Event source component.
    pub source: &'static str,
    /// Timestamp (Unix epoch seconds).
    pub timestamp: u64,
}

impl EventMeta {
    /// Creates new event metadata using the current timestamp.
    #[must_use]
    pub fn new(source: &'static str, correlation_id: Option<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            correlation_id,
            source,
            timestamp: current_timestamp(),
        }
    }
}

/// Events emitted while an operation runs.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// An operation was registered.
    OperationStarted {
        /// Event metadata.
        meta: EventMeta,
        /// The operation.
        operation_id: OperationId,
        /// Number of phases scheduled.
        phases: usize,
    },
    /// A phase produced its layer.
    PhaseCompleted {
        /// Event metadata.
        meta: EventMeta,
        /// The operation.
        operation_id: OperationId,
        /// Phase name.
        phase: String,
        /// Layer reliability.
        reliability: f64,
        /// Whether the layer is a fallback placeholder.
        fallback_only: bool,
    },
    /// Every synthesis provider failed and the local template was used.
    SynthesisFallback {
        /// Event metadata.
        meta: EventMeta,
        /// The operation.
        operation_id: OperationId,
        /// Providers attempted before falling back.
        attempts: usize,
    },
    /// An operation reached a terminal status.
    OperationFinished {
        /// Event metadata.
        meta: EventMeta,
        /// The operation.
        operation_id: OperationId,
        /// Terminal status.
        status: OperationStatus,
        /// Confidence percentage.
        confidence_score: f64,
        /// Total duration in milliseconds.
        duration_ms: u64,
    },
}

impl PipelineEvent {
    /// Returns the event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::OperationStarted { .. } => "operation.started",
            Self::PhaseCompleted { .. } => "phase.completed",
            Self::SynthesisFallback { .. } => "synthesis.fallback",
            Self::OperationFinished { .. } => "operation.finished",
        }
    }

    /// Returns the shared event metadata.
    #[must_use]
    pub const fn meta(&self) -> &EventMeta {
        match self {
            Self::OperationStarted { meta, .. }
            | Self::PhaseCompleted { meta, .. }
            | Self::SynthesisFallback { meta, .. }
            | Self::OperationFinished { meta, .. } => meta,
        }
    }

    /// Returns the operation the event belongs to.
    #[must_use]
    pub const fn operation_id(&self) -> &OperationId {
        match self {
            Self::OperationStarted { operation_id, .. }
            | Self::PhaseCompleted { operation_id, .. }
            | Self::SynthesisFallback { operation_id, .. }
            | Self::OperationFinished { operation_id, .. } => operation_id,
        }
    }
}
