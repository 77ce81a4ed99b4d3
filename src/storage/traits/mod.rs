//! Storage backend traits.

mod operation;
mod session;

pub use operation::OperationStore;
pub use session::SessionStore;
