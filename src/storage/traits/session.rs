//! Session store trait.

use crate::Result;
use crate::models::SessionRecord;

/// Trait for session memory backends.
pub trait SessionStore: Send + Sync {
    /// Retrieves a session record, if it exists.
    fn get(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Returns the record, creating an empty one on first contact.
    fn get_or_create(&self, session_id: &str) -> Result<SessionRecord>;

    /// Applies `apply` to the record under its lock, creating it if needed.
    fn update(&self, session_id: &str, apply: &mut dyn FnMut(&mut SessionRecord)) -> Result<()>;

    /// Returns the number of known sessions.
    fn count(&self) -> Result<usize>;
}
