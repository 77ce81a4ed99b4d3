//! Storage layer abstraction.
//!
//! Operations and sessions live behind injected store traits so the services
//! never touch a global. The in-memory stores lock per key: one slow update on
//! an operation never blocks reads of another.

// Allow significant_drop_tightening - entry guards are held only for the
// duration of a closure.
#![allow(clippy::significant_drop_tightening)]

pub mod memory;
pub mod traits;

pub use memory::{InMemoryOperationStore, InMemorySessionStore};
pub use traits::{OperationStore, SessionStore};
