//! Operation lifecycle tracking.
//!
//! Status only ever moves forward: `pending -> running -> completed` or
//! `running -> partially_failed`. Terminal operations are kept until they
//! outlive the retention window and are purged.

use crate::models::{ConsolidatedResult, IntelligenceLayer, Operation, OperationId, OperationStatus};
use crate::storage::{InMemoryOperationStore, OperationStore};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

/// Registers operations and records their progress.
pub struct OperationTracker {
    store: Arc<dyn OperationStore>,
    counter: AtomicU64,
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryOperationStore::new()))
    }
}

impl OperationTracker {
    /// Creates a tracker over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn OperationStore>) -> Self {
        Self {
            store,
            counter: AtomicU64::new(0),
        }
    }

    /// Registers a new pending operation and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the insert.
    pub fn start(&self, target: &str) -> Result<OperationId> {
        self.start_with_session(target, None)
    }

    /// Registers a new pending operation bound to a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the insert.
    #[instrument(skip(self, target), fields(operation_id = tracing::field::Empty))]
    pub fn start_with_session(&self, target: &str, session_id: Option<String>) -> Result<OperationId> {
        let id = self.next_id();
        tracing::Span::current().record("operation_id", id.as_str());
        self.store
            .insert(Operation::new(id.clone(), target).with_session(session_id))?;
        metrics::gauge!("operations_tracked").set(self.len() as f64);
        Ok(id)
    }

    /// Returns a snapshot of an operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOperation`] if no operation has that id.
    pub fn get(&self, id: &OperationId) -> Result<Operation> {
        self.store
            .get(id)?
            .ok_or_else(|| Error::UnknownOperation(id.clone()))
    }

    /// Moves a pending operation to running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOperation`] or [`Error::InvalidTransition`].
    pub fn mark_running(&self, id: &OperationId) -> Result<()> {
        self.modify(id, &mut |op| transition(op, OperationStatus::Running))
    }

    /// Appends a completed layer to a running operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOperation`], or [`Error::OperationFailed`] if
    /// the operation is not running.
    pub fn record_layer(&self, id: &OperationId, layer: IntelligenceLayer) -> Result<()> {
        let mut layer = Some(layer);
        self.modify(id, &mut |op| {
            if op.status != OperationStatus::Running {
                return Err(Error::OperationFailed {
                    operation: "record_layer".to_string(),
                    cause: format!("operation {} is {}", op.operation_id, op.status),
                });
            }
            if let Some(layer) = layer.take() {
                op.layers.push(layer);
            }
            Ok(())
        })
    }

    /// Marks a running operation completed with its final result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOperation`] or [`Error::InvalidTransition`].
    pub fn complete(&self, id: &OperationId, result: ConsolidatedResult) -> Result<()> {
        let mut result = Some(result);
        self.modify(id, &mut |op| {
            transition(op, OperationStatus::Completed)?;
            op.result = result.take();
            Ok(())
        })
    }

    /// Marks a running operation partially failed, replacing its layers with
    /// `partial_layers` and storing the best-effort result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOperation`] or [`Error::InvalidTransition`].
    pub fn fail_partial(
        &self,
        id: &OperationId,
        partial_layers: Vec<IntelligenceLayer>,
        result: ConsolidatedResult,
    ) -> Result<()> {
        let mut payload = Some((partial_layers, result));
        self.modify(id, &mut |op| {
            transition(op, OperationStatus::PartiallyFailed)?;
            if let Some((layers, result)) = payload.take() {
                op.layers = layers;
                op.result = Some(result);
            }
            Ok(())
        })
    }

    /// Removes terminal operations that finished more than `ttl` ago.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or updated.
    #[instrument(skip(self), fields(ttl_secs = ttl.as_secs()))]
    pub fn purge_expired(&self, ttl: Duration) -> Result<usize> {
        let Some(threshold) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return Ok(0);
        };

        let mut purged = 0;
        for id in self.store.list_ids()? {
            if let Some(operation) = self.store.get(&id)? {
                if operation.status.is_terminal() {
                    if let Some(finished_at) = operation.finished_at {
                        if finished_at < threshold && self.store.remove(&id)? {
                            purged += 1;
                        }
                    }
                }
            }
        }

        if purged > 0 {
            tracing::info!(purged, ttl_secs = ttl.as_secs(), "Purged expired operations");
        }
        metrics::counter!("operations_purged_total").increment(purged as u64);
        metrics::gauge!("operations_tracked").set(self.len() as f64);
        Ok(purged)
    }

    /// Returns the number of tracked operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.count().unwrap_or(0)
    }

    /// Returns whether no operations are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn modify(
        &self,
        id: &OperationId,
        apply: &mut dyn FnMut(&mut Operation) -> Result<()>,
    ) -> Result<()> {
        if self.store.update(id, apply)? {
            Ok(())
        } else {
            Err(Error::UnknownOperation(id.clone()))
        }
    }

    fn next_id(&self) -> OperationId {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let suffix = Uuid::new_v4().simple().to_string();
        OperationId::new(format!("op-{sequence:06}-{}", &suffix[..8]))
    }
}

fn transition(operation: &mut Operation, next: OperationStatus) -> Result<()> {
    if !operation.status.can_transition_to(next) {
        return Err(Error::InvalidTransition {
            id: operation.operation_id.clone(),
            from: operation.status,
            to: next,
        });
    }
    operation.status = next;
    if next.is_terminal() {
        operation.finished_at = Some(Utc::now());
    }
    Ok(())
}
