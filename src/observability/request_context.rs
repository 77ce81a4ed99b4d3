//! Operation context propagation for correlation IDs.

use crate::models::OperationId;
use std::cell::RefCell;
use std::future::Future;

/// Context of the pipeline operation currently executing.
#[derive(Clone, Debug)]
pub struct OperationContext {
    operation_id: OperationId,
    session_id: Option<String>,
}

impl OperationContext {
    /// Creates a context for `operation_id`.
    #[must_use]
    pub const fn new(operation_id: OperationId) -> Self {
        Self {
            operation_id,
            session_id: None,
        }
    }

    /// Attaches the session the operation runs for.
    #[must_use]
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Returns the operation ID.
    #[must_use]
    pub const fn operation_id(&self) -> &OperationId {
        &self.operation_id
    }

    /// Returns the session ID, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

tokio::task_local! {
    static TASK_CONTEXT: OperationContext;
}

thread_local! {
    static THREAD_CONTEXT: RefCell<Option<OperationContext>> = const { RefCell::new(None) };
}

/// Guard that restores the previous thread-local context on drop.
pub struct OperationContextGuard {
    previous: Option<OperationContext>,
}

impl Drop for OperationContextGuard {
    fn drop(&mut self) {
        THREAD_CONTEXT.with(|slot| {
            *slot.borrow_mut() = self.previous.take();
        });
    }
}

/// Enters an operation context for synchronous flows.
#[must_use]
pub fn enter_operation_context(context: OperationContext) -> OperationContextGuard {
    let previous = THREAD_CONTEXT.with(|slot| slot.borrow_mut().replace(context));
    OperationContextGuard { previous }
}

/// Scopes an operation context across an async future.
///
/// Spawned tasks do not inherit the context; re-scope it inside them.
pub async fn scope_operation_context<F, T>(context: OperationContext, fut: F) -> T
where
    F: Future<Output = T>,
{
    TASK_CONTEXT.scope(context, fut).await
}

/// Returns the current operation context, if set.
#[must_use]
pub fn current_operation_context() -> Option<OperationContext> {
    if let Ok(context) = TASK_CONTEXT.try_with(Clone::clone) {
        return Some(context);
    }

    THREAD_CONTEXT.with(|slot| slot.borrow().clone())
}

/// Returns the current operation ID as a string, if set.
#[must_use]
pub fn current_operation_id() -> Option<String> {
    if let Ok(id) = TASK_CONTEXT.try_with(|ctx| ctx.operation_id.to_string()) {
        return Some(id);
    }

    THREAD_CONTEXT.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|ctx| ctx.operation_id.to_string())
    })
}
