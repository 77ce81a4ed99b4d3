//! Deterministic local data source.
//!
//! Answers from a template without any network access. Used for the built-in
//! demo providers and as a scriptable stand-in for upstreams in tests.

use super::{ProviderClient, ProviderError, ProviderFuture, ProviderRequest};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// How a [`StaticSource`] responds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticBehavior {
    /// Render the template.
    Respond,
    /// Fail every call with the given message.
    Fail(String),
    /// Fail the first `n` calls, then respond.
    FailFirst(usize),
    /// Answer with a payload that cannot be used.
    Malformed,
    /// Never answer.
    Hang,
}

/// Template-driven provider.
#[derive(Debug)]
pub struct StaticSource {
    id: String,
    template: String,
    latency: Duration,
    behavior: StaticBehavior,
    calls: AtomicUsize,
}

impl StaticSource {
    /// Default response template.
    ///
    /// Templates may use `{provider}`, `{target}`, `{phase}` and
    /// `{context_items}` (the number of earlier findings supplied).
    pub const DEFAULT_TEMPLATE: &'static str = "{provider} reports on {target} ({phase}).";

    /// Creates a source that answers immediately with the default template.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            template: Self::DEFAULT_TEMPLATE.to_string(),
            latency: Duration::ZERO,
            behavior: StaticBehavior::Respond,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sets the response template.
    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Sets the simulated latency.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Sets the behavior.
    #[must_use]
    pub fn with_behavior(mut self, behavior: StaticBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Shorthand for a source that always fails.
    #[must_use]
    pub fn failing(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id).with_behavior(StaticBehavior::Fail(message.into()))
    }

    /// Shorthand for a source that never answers.
    #[must_use]
    pub fn hanging(id: impl Into<String>) -> Self {
        Self::new(id).with_behavior(StaticBehavior::Hang)
    }

    /// Returns how many times the source has been invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn render(&self, request: &ProviderRequest) -> String {
        self.template
            .replace("{provider}", &self.id)
            .replace("{target}", &request.target)
            .replace("{phase}", &request.phase)
            .replace("{context_items}", &request.context.len().to_string())
    }
}

impl ProviderClient for StaticSource {
    fn invoke<'a>(&'a self, request: &'a ProviderRequest, _deadline: Instant) -> ProviderFuture<'a> {
        let call_index = self.calls.fetch_add(1, Ordering::SeqCst);

        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            match &self.behavior {
                StaticBehavior::Respond => {},
                StaticBehavior::Fail(message) => {
                    return Err(ProviderError::Rejected {
                        status: 503,
                        message: message.clone(),
                    });
                },
                StaticBehavior::FailFirst(n) => {
                    if call_index < *n {
                        return Err(ProviderError::Rejected {
                            status: 503,
                            message: format!("scripted failure {}", call_index + 1),
                        });
                    }
                },
                StaticBehavior::Malformed => {
                    return Err(ProviderError::InvalidResponse(
                        "payload missing summary".to_string(),
                    ));
                },
                StaticBehavior::Hang => std::future::pending::<()>().await,
            }

            Ok(json!({
                "summary": self.render(request),
                "provider": self.id,
                "phase": request.phase,
                "context_items": request.context.len(),
            }))
        })
    }

    fn kind(&self) -> &'static str {
        "static"
    }
}
