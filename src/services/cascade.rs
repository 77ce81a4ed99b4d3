//! Priority-ordered fallback cascade.

use crate::models::{AttemptRecord, CallOutcome, CallStatus, ErrorKind, ProviderId};
use crate::observability::current_operation_id;
use crate::providers::{ProviderError, ProviderRequest, RegisteredProvider};
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;

/// Provider id recorded on the outcome of a cascade over an empty list.
pub const NO_PROVIDER: &str = "none";

/// Performs a single provider call bounded by `per_call_timeout`.
///
/// Never returns an error: every way the call can end is folded into the
/// outcome.
pub async fn call_provider(
    provider: &RegisteredProvider,
    request: &ProviderRequest,
    per_call_timeout: Duration,
) -> CallOutcome {
    let id = provider.id().clone();
    let started = Instant::now();
    let deadline = started + per_call_timeout;

    let result = tokio::time::timeout_at(deadline, provider.client.invoke(request, deadline))
        .await
        .unwrap_or(Err(ProviderError::Timeout));
    let latency = started.elapsed();

    let outcome = match result {
        Ok(payload) => CallOutcome::success(id, payload, latency),
        Err(ProviderError::Timeout) => CallOutcome::timeout(id, ErrorKind::Timeout, latency),
        Err(err) => CallOutcome::failure(id, err.kind(), err.to_string(), latency),
    };
    record_call_metrics(&outcome);
    outcome
}

fn record_call_metrics(outcome: &CallOutcome) {
    let provider = outcome.provider_id.to_string();
    let status = outcome.status.as_str();
    metrics::counter!(
        "provider_calls_total",
        "provider" => provider.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "provider_call_duration_ms",
        "provider" => provider.clone(),
        "status" => status
    )
    .record(outcome.latency.as_secs_f64() * 1000.0);
    if outcome.status == CallStatus::Timeout {
        metrics::counter!("provider_timeouts_total", "provider" => provider).increment(1);
    }
}

/// Tries interchangeable providers strictly in priority order and stops at
/// the first success.
#[derive(Debug, Clone, Copy)]
pub struct CascadeExecutor {
    per_call_timeout: Duration,
}

impl CascadeExecutor {
    /// Creates a cascade with the given per-attempt deadline.
    #[must_use]
    pub const fn new(per_call_timeout: Duration) -> Self {
        Self { per_call_timeout }
    }

    /// Returns the per-attempt deadline.
    #[must_use]
    pub const fn per_call_timeout(&self) -> Duration {
        self.per_call_timeout
    }

    /// Returns the first successful outcome, trying `providers` in order.
    ///
    /// `providers` must already be sorted by ascending priority. Providers
    /// after the first success are never invoked. Providers whose circuit is
    /// open are skipped and recorded as `circuit_open` attempts.
    ///
    /// When every provider fails, the result is a `Failure` outcome with
    /// kind `exhausted` attributed to the first provider and carrying every
    /// attempt. An empty list yields a `no_providers` failure immediately.
    #[instrument(
        skip_all,
        fields(
            phase = %request.phase,
            providers = providers.len(),
            operation_id = current_operation_id().as_deref().unwrap_or("-"),
        )
    )]
    pub async fn try_in_priority_order(
        &self,
        providers: &[RegisteredProvider],
        request: &ProviderRequest,
    ) -> CallOutcome {
        let started = Instant::now();
        let Some(first) = providers.first() else {
            return CallOutcome::failure(
                ProviderId::from(NO_PROVIDER),
                ErrorKind::NoProviders,
                "no providers available",
                Duration::ZERO,
            );
        };

        let mut attempts: Vec<AttemptRecord> = Vec::with_capacity(providers.len());
        for provider in providers {
            if !provider.client.is_available() {
                tracing::debug!(provider = %provider.id(), "Skipping provider with open circuit");
                let skipped = CallOutcome::failure(
                    provider.id().clone(),
                    ErrorKind::CircuitOpen,
                    ProviderError::CircuitOpen.to_string(),
                    Duration::ZERO,
                );
                attempts.push(AttemptRecord::from(&skipped));
                continue;
            }

            let outcome = call_provider(provider, request, self.per_call_timeout).await;
            if outcome.is_success() {
                if !attempts.is_empty() {
                    metrics::counter!(
                        "cascade_fallbacks_total",
                        "provider" => provider.id().to_string()
                    )
                    .increment(1);
                    tracing::info!(
                        provider = %provider.id(),
                        failed_attempts = attempts.len(),
                        "Cascade recovered through fallback provider"
                    );
                }
                return outcome.with_attempts(attempts);
            }

            tracing::warn!(
                provider = %provider.id(),
                status = %outcome.status,
                error_kind = outcome.error_kind.map_or("unknown", |k| k.as_str()),
                error = outcome.error.as_deref().unwrap_or(""),
                "Provider attempt failed"
            );
            attempts.push(AttemptRecord::from(&outcome));
        }

        let detail = attempts
            .iter()
            .map(|a| {
                format!(
                    "{}: {}",
                    a.provider_id,
                    a.error
                        .as_deref()
                        .unwrap_or_else(|| a.error_kind.map_or("failed", |k| k.as_str()))
                )
            })
            .collect::<Vec<_>>()
            .join("; ");

        CallOutcome::failure(
            first.id().clone(),
            ErrorKind::Exhausted,
            format!("all {} provider(s) failed: {detail}", attempts.len()),
            started.elapsed(),
        )
        .with_attempts(attempts)
    }
}
