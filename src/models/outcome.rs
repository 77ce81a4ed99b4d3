//! Per-attempt call outcomes.

use super::ProviderId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Terminal state of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// The provider returned a usable payload.
    Success,
    /// The provider rejected or errored the request.
    Failure,
    /// The call did not settle before its deadline.
    Timeout,
}

impl CallStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a non-successful outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The upstream returned an error.
    Upstream,
    /// The upstream answered with something unusable.
    InvalidResponse,
    /// The per-call deadline elapsed.
    Timeout,
    /// The enclosing phase deadline elapsed first; the call was abandoned.
    PhaseDeadline,
    /// The provider list was empty.
    NoProviders,
    /// Every provider in a cascade failed.
    Exhausted,
    /// The provider's circuit breaker rejected the call.
    CircuitOpen,
    /// The provider task panicked.
    Panicked,
}

impl ErrorKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::InvalidResponse => "invalid_response",
            Self::Timeout => "timeout",
            Self::PhaseDeadline => "phase_deadline",
            Self::NoProviders => "no_providers",
            Self::Exhausted => "exhausted",
            Self::CircuitOpen => "circuit_open",
            Self::Panicked => "panicked",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compact record of one attempt, kept for audit after the outcome is folded
/// into a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// The provider attempted.
    pub provider_id: ProviderId,
    /// How the attempt ended.
    pub status: CallStatus,
    /// Error classification, if any.
    pub error_kind: Option<ErrorKind>,
    /// Error message, if any.
    pub error: Option<String>,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: u64,
}

impl From<&CallOutcome> for AttemptRecord {
    fn from(outcome: &CallOutcome) -> Self {
        Self {
            provider_id: outcome.provider_id.clone(),
            status: outcome.status,
            error_kind: outcome.error_kind,
            error: outcome.error.clone(),
            latency_ms: duration_ms(outcome.latency),
        }
    }
}

/// Result of one provider attempt (or of a whole cascade).
///
/// Created per attempt and never mutated afterwards. A cascade outcome
/// additionally carries every earlier attempt in `attempts`, so a fallback
/// success still records that the primary was tried and failed.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    /// The provider that produced this outcome.
    pub provider_id: ProviderId,
    /// Terminal status.
    pub status: CallStatus,
    /// Opaque payload on success.
    pub payload: Option<Value>,
    /// Wall-clock latency of the attempt (or of the whole cascade).
    pub latency: Duration,
    /// Error classification, if any.
    pub error_kind: Option<ErrorKind>,
    /// Error message, if any.
    pub error: Option<String>,
    /// Earlier attempts that failed before this outcome.
    pub attempts: Vec<AttemptRecord>,
}

impl CallOutcome {
    /// Creates a successful outcome.
    #[must_use]
    pub const fn success(provider_id: ProviderId, payload: Value, latency: Duration) -> Self {
        Self {
            provider_id,
            status: CallStatus::Success,
            payload: Some(payload),
            latency,
            error_kind: None,
            error: None,
            attempts: Vec::new(),
        }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn failure(
        provider_id: ProviderId,
        kind: ErrorKind,
        error: impl Into<String>,
        latency: Duration,
    ) -> Self {
        Self {
            provider_id,
            status: CallStatus::Failure,
            payload: None,
            latency,
            error_kind: Some(kind),
            error: Some(error.into()),
            attempts: Vec::new(),
        }
    }

    /// Creates a timed-out outcome.
    #[must_use]
    pub fn timeout(provider_id: ProviderId, kind: ErrorKind, latency: Duration) -> Self {
        Self {
            provider_id,
            status: CallStatus::Timeout,
            payload: None,
            latency,
            error_kind: Some(kind),
            error: Some(format!("deadline exceeded after {}ms", duration_ms(latency))),
            attempts: Vec::new(),
        }
    }

    /// Attaches earlier attempts.
    #[must_use]
    pub fn with_attempts(mut self, attempts: Vec<AttemptRecord>) -> Self {
        self.attempts = attempts;
        self
    }

    /// Returns whether the outcome is a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Success
    }

    /// Returns the ids of every provider touched, earlier attempts first.
    #[must_use]
    pub fn attempted_ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self
            .attempts
            .iter()
            .map(|attempt| attempt.provider_id.clone())
            .collect();
        if !ids.contains(&self.provider_id) {
            ids.push(self.provider_id.clone());
        }
        ids
    }

    /// Returns a short textual rendering of the payload, if any.
    #[must_use]
    pub fn summary(&self) -> Option<String> {
        self.payload.as_ref().map(payload_summary)
    }
}

/// Renders a payload as display text.
///
/// Strings are used as-is; objects contribute their `summary`, `content` or
/// `text` field when present; anything else is serialized compactly.
#[must_use]
pub fn payload_summary(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.trim().to_string(),
        Value::Object(map) => ["summary", "content", "text"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map_or_else(|| payload.to_string(), |text| text.trim().to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
