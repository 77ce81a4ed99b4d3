//! Concurrent fan-out across independent providers.
//!
//! Every provider (or cascade slot) runs as its own task. One outcome is
//! produced per input, in input order, regardless of how the tasks end:
//! success, failure, timeout, panic or cancellation at the phase deadline.

use super::cascade::{CascadeExecutor, NO_PROVIDER, call_provider};
use crate::models::{CallOutcome, ErrorKind, ProviderId};
use crate::observability::{current_operation_context, scope_operation_context};
use crate::providers::{ProviderRequest, RegisteredProvider};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use tracing::{Instrument, instrument};

/// Default number of provider calls allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 16;

/// Runs provider calls concurrently behind a shared bulkhead.
///
/// The bulkhead is shared by every fan-out issued through the same
/// aggregator, so concurrent operations compete for the same permits.
#[derive(Debug, Clone)]
pub struct FanOutAggregator {
    bulkhead: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Default for FanOutAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_CALLS)
    }
}

impl FanOutAggregator {
    /// Creates an aggregator allowing `max_concurrent` calls in flight.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            bulkhead: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Returns the number of free bulkhead permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.bulkhead.available_permits()
    }

    /// Calls every provider concurrently and returns one outcome per
    /// provider, in input order.
    ///
    /// Each call is bounded by `per_call_timeout`. When `phase_deadline`
    /// passes first, calls still running are cancelled and reported as
    /// `Timeout` outcomes of kind `phase_deadline`.
    #[instrument(
        skip_all,
        fields(phase = %request.phase, providers = providers.len())
    )]
    pub async fn call_all(
        &self,
        providers: &[RegisteredProvider],
        request: &ProviderRequest,
        per_call_timeout: Duration,
        phase_deadline: Option<Instant>,
    ) -> Vec<CallOutcome> {
        let request = Arc::new(request.clone());
        let jobs = providers
            .iter()
            .map(|provider| {
                let provider = provider.clone();
                let request = Arc::clone(&request);
                let owner = provider.id().clone();
                let job = async move { call_provider(&provider, &request, per_call_timeout).await };
                (owner, job)
            })
            .collect();
        self.settle_all(jobs, phase_deadline).await
    }

    /// Like [`Self::call_all`], but each slot is a priority-ordered group of
    /// interchangeable providers that cascades on failure.
    ///
    /// A slot with a single member is a plain call; its outcome keeps its
    /// own status instead of being folded into an exhausted cascade. An
    /// empty slot still yields a `no_providers` failure in its position.
    #[instrument(
        skip_all,
        fields(phase = %request.phase, slots = slots.len())
    )]
    pub async fn call_all_cascading(
        &self,
        slots: &[Vec<RegisteredProvider>],
        request: &ProviderRequest,
        per_call_timeout: Duration,
        phase_deadline: Option<Instant>,
    ) -> Vec<CallOutcome> {
        let request = Arc::new(request.clone());
        let cascade = CascadeExecutor::new(per_call_timeout);
        let jobs = slots
            .iter()
            .map(|slot| {
                let owner = slot
                    .first()
                    .map_or_else(|| ProviderId::from(NO_PROVIDER), |p| p.id().clone());
                let slot = slot.clone();
                let request = Arc::clone(&request);
                let job = async move {
                    match slot.as_slice() {
                        [single] => call_provider(single, &request, per_call_timeout).await,
                        members => cascade.try_in_priority_order(members, &request).await,
                    }
                };
                (owner, job)
            })
            .collect();
        self.settle_all(jobs, phase_deadline).await
    }

    async fn settle_all<F>(
        &self,
        jobs: Vec<(ProviderId, F)>,
        phase_deadline: Option<Instant>,
    ) -> Vec<CallOutcome>
    where
        F: Future<Output = CallOutcome> + Send + 'static,
    {
        let started = Instant::now();
        let context = current_operation_context();
        let mut owners: Vec<ProviderId> = Vec::with_capacity(jobs.len());
        let mut settled: Vec<Option<CallOutcome>> = vec![None; jobs.len()];
        let mut index_of: HashMap<task::Id, usize> = HashMap::with_capacity(jobs.len());
        let mut join_set = JoinSet::new();

        for (index, (owner, job)) in jobs.into_iter().enumerate() {
            let bulkhead = Arc::clone(&self.bulkhead);
            let guarded = async move {
                // A closed semaphore only happens on shutdown; run unguarded then.
                let _permit = bulkhead.acquire_owned().await.ok();
                job.await
            }
            .instrument(tracing::Span::current());
            let handle = match context.clone() {
                Some(ctx) => join_set.spawn(scope_operation_context(ctx, guarded)),
                None => join_set.spawn(guarded),
            };
            index_of.insert(handle.id(), index);
            owners.push(owner);
        }

        loop {
            let next = match phase_deadline {
                Some(deadline) => {
                    if let Ok(next) =
                        tokio::time::timeout_at(deadline, join_set.join_next_with_id()).await
                    {
                        next
                    } else {
                        let pending = settled.iter().filter(|s| s.is_none()).count();
                        metrics::counter!("phase_deadline_cancellations_total")
                            .increment(pending as u64);
                        tracing::warn!(pending, "Phase deadline reached, cancelling calls");
                        break;
                    }
                },
                None => join_set.join_next_with_id().await,
            };

            match next {
                None => break,
                Some(Ok((id, outcome))) => {
                    if let Some(&index) = index_of.get(&id) {
                        settled[index] = Some(outcome);
                    }
                },
                Some(Err(err)) => {
                    let Some(&index) = index_of.get(&err.id()) else {
                        continue;
                    };
                    let (kind, message) = if err.is_panic() {
                        metrics::counter!(
                            "provider_task_panics_total",
                            "provider" => owners[index].to_string()
                        )
                        .increment(1);
                        tracing::error!(provider = %owners[index], "Provider task panicked");
                        (ErrorKind::Panicked, "provider task panicked")
                    } else {
                        (ErrorKind::PhaseDeadline, "provider task cancelled")
                    };
                    settled[index] = Some(CallOutcome::failure(
                        owners[index].clone(),
                        kind,
                        message,
                        started.elapsed(),
                    ));
                },
            }
        }

        join_set.shutdown().await;

        let elapsed = started.elapsed();
        settled
            .into_iter()
            .zip(owners)
            .map(|(outcome, owner)| {
                outcome.unwrap_or_else(|| {
                    CallOutcome::timeout(owner, ErrorKind::PhaseDeadline, elapsed)
                })
            })
            .collect()
    }
}
