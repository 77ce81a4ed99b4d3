//! Orchestration services.
//!
//! Services compose providers and stores into the layered pipeline. The
//! [`Engine`] is the entry point; the other services are usable on their own.

mod cascade;
mod engine;
mod fanout;
mod pipeline;
mod scoring;
mod session;
mod synthesis;
mod tracker;

pub use cascade::{CascadeExecutor, NO_PROVIDER, call_provider};
pub use engine::{Engine, PipelineRun, RunOptions};
pub use fanout::{DEFAULT_MAX_CONCURRENT_CALLS, FanOutAggregator};
pub use pipeline::{LayeredPipeline, PipelineLayers};
pub use scoring::ReliabilityScorer;
pub use session::{DEFAULT_HISTORY_LIMIT, SessionMemory};
pub use synthesis::{ResponseSynthesizer, Synthesis, render_local_template, sources_used};
pub use tracker::OperationTracker;
