//! Data models for convergent.
//!
//! This module contains the core data structures shared by the registry, the
//! pipeline services and the stores.

mod events;
mod layer;
mod operation;
mod outcome;
mod presentation;
mod provider;
mod session;

pub use events::{EventMeta, PipelineEvent};
pub use layer::{FALLBACK_SOURCE, IntelligenceLayer};
pub use operation::{ConsolidatedResult, LOCAL_TEMPLATE, Operation, OperationId, OperationStatus};
pub use outcome::{AttemptRecord, CallOutcome, CallStatus, ErrorKind, payload_summary};
pub(crate) use outcome::duration_ms;
pub use presentation::{PresentationConfig, RawPresentation, Structure, Tone, Verbosity};
pub use provider::{Provider, ProviderId, capability};
pub use session::{SessionEntry, SessionRecord};
