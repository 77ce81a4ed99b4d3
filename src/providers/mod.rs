//! Provider client abstraction.
//!
//! Every upstream, whether a model backend or a data source, is reached
//! through [`ProviderClient`]. The trait is object-safe through explicit
//! boxing of the async return type, so the registry can hold heterogeneous
//! clients behind `Arc<dyn ProviderClient>`.

mod openai;
mod registry;
mod resilience;
mod static_source;

pub use openai::OpenAiCompatibleProvider;
pub use registry::{ProviderRegistry, RegisteredProvider};
pub use resilience::ResilientProvider;
pub use static_source::{StaticBehavior, StaticSource};

use crate::models::{ErrorKind, OperationId};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::Instant;

/// Boxed future returned by [`ProviderClient::invoke`].
pub type ProviderFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, ProviderError>> + Send + 'a>>;

/// Errors a provider call can end with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The call did not finish before its deadline.
    #[error("request timed out")]
    Timeout,

    /// The upstream answered with an error status.
    #[error("upstream rejected request with status {status}: {message}")]
    Rejected {
        /// HTTP-like status code.
        status: u16,
        /// Message returned by the upstream.
        message: String,
    },

    /// The request never reached the upstream.
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream answered with something unusable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The provider is not configured or refused to serve.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The circuit breaker rejected the call without reaching the upstream.
    #[error("circuit breaker open")]
    CircuitOpen,
}

impl ProviderError {
    /// Classifies the error for outcome bookkeeping.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::Timeout,
            Self::InvalidResponse(_) => ErrorKind::InvalidResponse,
            Self::CircuitOpen => ErrorKind::CircuitOpen,
            Self::Rejected { .. } | Self::Transport(_) | Self::Unavailable(_) => {
                ErrorKind::Upstream
            },
        }
    }

    /// Returns whether the error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Request passed to every provider in a phase.
///
/// Earlier layers are passed as rendered summaries so a provider can never
/// mutate them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderRequest {
    /// Operation the request belongs to.
    pub operation_id: Option<OperationId>,
    /// The query target.
    pub target: String,
    /// Caller-supplied requirements.
    pub requirements: Vec<String>,
    /// Phase name, or `synthesis` / `enhancement`.
    pub phase: String,
    /// One line per earlier layer.
    pub context: Vec<String>,
    /// Recent session history lines.
    pub session_context: Vec<String>,
    /// Extra instruction, e.g. presentation settings for synthesis.
    pub instruction: Option<String>,
}

impl ProviderRequest {
    /// Creates a request for a target.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Sets the phase name.
    #[must_use]
    pub fn for_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = phase.into();
        self
    }

    /// Sets the requirements.
    #[must_use]
    pub fn with_requirements(mut self, requirements: Vec<String>) -> Self {
        self.requirements = requirements;
        self
    }

    /// Sets the earlier-layer context.
    #[must_use]
    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }

    /// Sets the session history context.
    #[must_use]
    pub fn with_session_context(mut self, session_context: Vec<String>) -> Self {
        self.session_context = session_context;
        self
    }

    /// Sets the instruction.
    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Sets the operation id.
    #[must_use]
    pub fn with_operation(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }

    /// Renders the request as a single prompt for text-based upstreams.
    #[must_use]
    pub fn render_prompt(&self) -> String {
        let mut prompt = format!("Target: {}\nPhase: {}\n", self.target, self.phase);
        if !self.requirements.is_empty() {
            prompt.push_str("Requirements:\n");
            for requirement in &self.requirements {
                prompt.push_str("- ");
                prompt.push_str(requirement);
                prompt.push('\n');
            }
        }
        if !self.context.is_empty() {
            prompt.push_str("Findings so far:\n");
            for line in &self.context {
                prompt.push_str("- ");
                prompt.push_str(line);
                prompt.push('\n');
            }
        }
        if !self.session_context.is_empty() {
            prompt.push_str("Earlier in this session:\n");
            for line in &self.session_context {
                prompt.push_str("- ");
                prompt.push_str(line);
                prompt.push('\n');
            }
        }
        if let Some(instruction) = &self.instruction {
            prompt.push_str(instruction);
            prompt.push('\n');
        }
        prompt
    }
}

/// Unified trait for upstream providers.
pub trait ProviderClient: Send + Sync {
    /// Performs one call.
    ///
    /// `deadline` is advisory for the client; callers enforce it regardless.
    fn invoke<'a>(&'a self, request: &'a ProviderRequest, deadline: Instant) -> ProviderFuture<'a>;

    /// Short adapter name for logs and metrics.
    fn kind(&self) -> &'static str;

    /// Returns false when the client would reject a call without trying,
    /// e.g. while a circuit breaker is open.
    fn is_available(&self) -> bool {
        true
    }
}

impl<T: ProviderClient + ?Sized> ProviderClient for Arc<T> {
    fn invoke<'a>(&'a self, request: &'a ProviderRequest, deadline: Instant) -> ProviderFuture<'a> {
        (**self).invoke(request, deadline)
    }

    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}
