//! Operations and their consolidated results.

use super::{IntelligenceLayer, ProviderId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value of [`ConsolidatedResult::synthesized_by`] when no provider
/// synthesized the narrative.
pub const LOCAL_TEMPLATE: &str = "local-template";

/// Unique identifier for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Creates a new operation ID.
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

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OperationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of an operation.
///
/// Transitions only move forward: `Pending -> Running -> {Completed,
/// PartiallyFailed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Registered, not started.
    #[default]
    Pending,
    /// Phases are executing.
    Running,
    /// Finished, but at least one phase had no real source.
    PartiallyFailed,
    /// Finished with every phase backed by a real source.
    Completed,
}

impl OperationStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::PartiallyFailed => "partially_failed",
            Self::Completed => "completed",
        }
    }

    /// Returns whether the status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::PartiallyFailed | Self::Completed)
    }

    /// Returns whether moving to `next` keeps the lifecycle monotonic.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed | Self::PartiallyFailed)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final caller-facing answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedResult {
    /// Synthesized narrative. Never empty.
    pub narrative: String,
    /// Confidence percentage in `[0, 100]`.
    pub confidence_score: f64,
    /// Distinct real providers that contributed to any layer, in first-seen
    /// order.
    pub sources_used: Vec<ProviderId>,
    /// Set when synthesis fell back to the local template or a phase had no
    /// real source.
    pub degraded: bool,
    /// Provider that produced the narrative, or [`LOCAL_TEMPLATE`].
    pub synthesized_by: String,
}

/// Snapshot of a tracked operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique identifier.
    pub operation_id: OperationId,
    /// The query target.
    pub target: String,
    /// Session the operation belongs to, if any.
    pub session_id: Option<String>,
    /// Current status.
    pub status: OperationStatus,
    /// Layers recorded so far.
    pub layers: Vec<IntelligenceLayer>,
    /// When the operation was registered.
    pub started_at: DateTime<Utc>,
    /// When the operation reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Final result, present once terminal.
    pub result: Option<ConsolidatedResult>,
}

impl Operation {
    /// Creates a pending operation.
    #[must_use]
    pub fn new(operation_id: OperationId, target: impl Into<String>) -> Self {
        Self {
            operation_id,
            target: target.into(),
            session_id: None,
            status: OperationStatus::Pending,
            layers: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            result: None,
        }
    }

    /// Attaches a session id.
    #[must_use]
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}
