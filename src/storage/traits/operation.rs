//! Operation store trait.

use crate::Result;
use crate::models::{Operation, OperationId};

/// Trait for operation state backends.
///
/// Implementations must serialize updates to the same operation and must not
/// hold any lock across calls into other operations.
pub trait OperationStore: Send + Sync {
    /// Stores a new operation, replacing any existing entry with the same id.
    fn insert(&self, operation: Operation) -> Result<()>;

    /// Retrieves a snapshot of an operation.
    fn get(&self, id: &OperationId) -> Result<Option<Operation>>;

    /// Applies `apply` to the stored operation under its lock.
    ///
    /// Returns `Ok(false)` when no operation has that id. An error returned by
    /// `apply` is propagated and the operation is left as `apply` left it.
    fn update(
        &self,
        id: &OperationId,
        apply: &mut dyn FnMut(&mut Operation) -> Result<()>,
    ) -> Result<bool>;

    /// Removes an operation.
    fn remove(&self, id: &OperationId) -> Result<bool>;

    /// Lists all operation ids.
    fn list_ids(&self) -> Result<Vec<OperationId>>;

    /// Returns the number of stored operations.
    fn count(&self) -> Result<usize> {
        Ok(self.list_ids()?.len())
    }
}
