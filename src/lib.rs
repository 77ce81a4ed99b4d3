//! # Convergent
//!
//! Confidence-weighted aggregation over unreliable upstream providers.
//!
//! Convergent answers a query by consulting several independent providers
//! (model backends, external data sources) and returns one synthesized,
//! confidence-scored answer even when most of them fail or time out.
//!
//! ## Features
//!
//! - Priority-ordered fallback cascade across interchangeable providers
//! - Settle-all concurrent fan-out with per-call and per-phase deadlines
//! - Reliability scoring per source and per batch, bounded to `[0, 1]`
//! - Multi-phase pipeline that degrades confidence instead of failing
//! - Synthesis through providers with a deterministic local fallback
//! - Operation tracking with status polling and bounded session memory
//!
//! ## Example
//!
//! ```rust,ignore
//! use convergent::{Engine, EngineConfig, PresentationConfig};
//!
//! let engine = Engine::from_config(EngineConfig::default())?;
//! let run = engine
//!     .run_pipeline("rust async runtimes", &[], PresentationConfig::default())
//!     .await?;
//! println!("{} ({:.1}%)", run.result.narrative, run.confidence_score());
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod models;
pub mod observability;
pub mod providers;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::{EngineConfig, PhaseConfig, ProviderConfig, ScoringConfig};
pub use models::{
    CallOutcome, CallStatus, ConsolidatedResult, ErrorKind, IntelligenceLayer, Operation,
    OperationId, OperationStatus, PresentationConfig, Provider, ProviderId, SessionRecord,
    Structure, Tone, Verbosity,
};
pub use providers::{ProviderClient, ProviderError, ProviderRegistry, ProviderRequest};
pub use services::{
    CascadeExecutor, Engine, FanOutAggregator, LayeredPipeline, OperationTracker,
    PipelineRun, ReliabilityScorer, ResponseSynthesizer, RunOptions, SessionMemory,
};

/// Error type for convergent operations.
///
/// Only [`Error::UnknownOperation`] and [`Error::InvalidInput`] ever reach a
/// caller of the pipeline. The provider-level variants are recorded on
/// outcomes and layers and recovered locally.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `ProviderTimeout` | A provider call exceeded its deadline |
/// | `ProviderFailure` | A provider rejected or errored a request |
/// | `NoProvidersAvailable` | No provider carries a required capability |
/// | `SynthesisFailure` | Every synthesis provider failed |
/// | `UnknownOperation` | Status query for an id never returned by `start` |
/// | `InvalidInput` | Empty target, malformed config values |
/// | `InvalidTransition` | Operation status would move backwards |
/// | `OperationFailed` | Config I/O, observability init, store failures |
#[derive(Debug, ThisError)]
pub enum Error {
    /// A provider call exceeded its deadline.
    #[error("provider '{provider}' timed out after {elapsed_ms}ms")]
    ProviderTimeout {
        /// The provider that timed out.
        provider: String,
        /// Time spent before giving up.
        elapsed_ms: u64,
    },

    /// A provider rejected the request or failed while serving it.
    #[error("provider '{provider}' failed: {cause}")]
    ProviderFailure {
        /// The provider that failed.
        provider: String,
        /// The underlying cause.
        cause: String,
    },

    /// No provider is registered for a required capability.
    #[error("no providers available for capability '{capability}'")]
    NoProvidersAvailable {
        /// The capability that had no providers.
        capability: String,
    },

    /// All synthesis providers failed.
    ///
    /// Recovered through the local template; never surfaced from
    /// [`Engine::run_pipeline`].
    #[error("synthesis failed after {attempts} attempt(s)")]
    SynthesisFailure {
        /// Number of providers attempted.
        attempts: usize,
    },

    /// Status query for an operation id that was never issued.
    #[error("unknown operation: {0}")]
    UnknownOperation(OperationId),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation status transition would violate monotonicity.
    #[error("invalid transition for operation {id}: {from} -> {to}")]
    InvalidTransition {
        /// The operation.
        id: OperationId,
        /// Current status.
        from: OperationStatus,
        /// Requested status.
        to: OperationStatus,
    },

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for convergent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
///
/// # Examples
///
/// ```rust
/// use convergent::current_timestamp;
///
/// let ts = current_timestamp();
/// assert!(ts > 0);
/// ```
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("empty target".to_string());
        assert_eq!(err.to_string(), "invalid input: empty target");

        let err = Error::ProviderFailure {
            provider: "alpha".to_string(),
            cause: "503".to_string(),
        };
        assert_eq!(err.to_string(), "provider 'alpha' failed: 503");

        let err = Error::UnknownOperation(OperationId::from("op-000001-deadbeef"));
        assert_eq!(err.to_string(), "unknown operation: op-000001-deadbeef");

        let err = Error::InvalidTransition {
            id: OperationId::from("op-1"),
            from: OperationStatus::Completed,
            to: OperationStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "invalid transition for operation op-1: completed -> running"
        );
    }
}
