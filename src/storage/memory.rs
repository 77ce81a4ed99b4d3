//! In-memory stores with per-key locking.
//!
//! The outer map lock is only held long enough to clone an entry's `Arc`;
//! all reads and updates of an entry happen under that entry's own mutex.

use crate::Result;
use crate::models::{Operation, OperationId, SessionRecord};
use crate::storage::traits::{OperationStore, SessionStore};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Map of independently locked entries.
#[derive(Debug)]
struct KeyedEntries<K, V> {
    entries: RwLock<HashMap<K, Arc<Mutex<V>>>>,
}

impl<K, V> Default for KeyedEntries<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> KeyedEntries<K, V> {
    fn entry<Q>(&self, key: &Q) -> Option<Arc<Mutex<V>>>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).cloned()
    }

    fn entry_or_insert_with(&self, key: K, init: impl FnOnce() -> V) -> Arc<Mutex<V>> {
        if let Some(entry) = self.entry(&key) {
            return entry;
        }
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            map.entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(init()))),
        )
    }

    fn insert(&self, key: K, value: V) {
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(key, Arc::new(Mutex::new(value)));
    }

    fn snapshot<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entry(key).map(|entry| {
            entry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }

    fn remove<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(key).is_some()
    }

    fn keys(&self) -> Vec<K> {
        let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        map.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// In-memory [`OperationStore`].
#[derive(Debug, Default)]
pub struct InMemoryOperationStore {
    inner: KeyedEntries<OperationId, Operation>,
}

impl InMemoryOperationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OperationStore for InMemoryOperationStore {
    fn insert(&self, operation: Operation) -> Result<()> {
        self.inner.insert(operation.operation_id.clone(), operation);
        Ok(())
    }

    fn get(&self, id: &OperationId) -> Result<Option<Operation>> {
        Ok(self.inner.snapshot(id))
    }

    fn update(
        &self,
        id: &OperationId,
        apply: &mut dyn FnMut(&mut Operation) -> Result<()>,
    ) -> Result<bool> {
        let Some(entry) = self.inner.entry(id) else {
            return Ok(false);
        };
        let mut operation = entry.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut operation)?;
        Ok(true)
    }

    fn remove(&self, id: &OperationId) -> Result<bool> {
        Ok(self.inner.remove(id))
    }

    fn list_ids(&self) -> Result<Vec<OperationId>> {
        Ok(self.inner.keys())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.inner.len())
    }
}

/// In-memory [`SessionStore`].
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    inner: KeyedEntries<String, SessionRecord>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.inner.snapshot(session_id))
    }

    fn get_or_create(&self, session_id: &str) -> Result<SessionRecord> {
        let entry = self
            .inner
            .entry_or_insert_with(session_id.to_string(), || SessionRecord::new(session_id));
        let record = entry.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(record.clone())
    }

    fn update(&self, session_id: &str, apply: &mut dyn FnMut(&mut SessionRecord)) -> Result<()> {
        let entry = self
            .inner
            .entry_or_insert_with(session_id.to_string(), || SessionRecord::new(session_id));
        let mut record = entry.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut record);
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.inner.len())
    }
}
