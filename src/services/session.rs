//! Per-session conversational memory.

use crate::Result;
use crate::models::{SessionEntry, SessionRecord};
use crate::storage::{InMemorySessionStore, SessionStore};
use std::sync::Arc;

/// Default number of entries kept per session.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Bounded history and adaptive tags keyed by session id.
///
/// Sessions are isolated from one another; concurrent appends to the same
/// session are serialized by the store.
pub struct SessionMemory {
    store: Arc<dyn SessionStore>,
    limit: usize,
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self::new(Arc::new(InMemorySessionStore::new()), DEFAULT_HISTORY_LIMIT)
    }
}

impl SessionMemory {
    /// Creates session memory over `store`, keeping `limit` entries each.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, limit: usize) -> Self {
        Self { store, limit }
    }

    /// Returns the per-session history limit.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the session record, creating an empty one on first contact.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get(&self, session_id: &str) -> Result<SessionRecord> {
        self.store.get_or_create(session_id)
    }

    /// Appends an entry, evicting the oldest beyond the limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn append(&self, session_id: &str, entry: SessionEntry) -> Result<()> {
        let limit = self.limit;
        let mut entry = Some(entry);
        self.store.update(session_id, &mut |record| {
            if let Some(entry) = entry.take() {
                record.push(entry, limit);
            }
        })?;
        metrics::counter!("session_entries_appended_total").increment(1);
        Ok(())
    }

    /// Sets an adaptive profile tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn tag(&self, session_id: &str, key: &str, value: &str) -> Result<()> {
        self.store.update(session_id, &mut |record| {
            record.profile.insert(key.to_string(), value.to_string());
        })
    }

    /// Renders the session history as context lines for providers, oldest
    /// first. Unknown sessions yield no lines and are not created.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn context_for(&self, session_id: &str) -> Result<Vec<String>> {
        let Some(record) = self.store.get(session_id)? else {
            return Ok(Vec::new());
        };
        Ok(record
            .history
            .iter()
            .map(|entry| {
                format!(
                    "Earlier query '{}' ({:.0}% confidence): {}",
                    entry.query, entry.confidence, entry.summary
                )
            })
            .collect())
    }

    /// Returns the number of known sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.count().unwrap_or(0)
    }

    /// Returns whether no sessions are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
