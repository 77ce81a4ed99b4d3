//! Bounded per-session history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// One completed query remembered for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    /// The query target.
    pub query: String,
    /// Short summary of the answer.
    pub summary: String,
    /// Confidence percentage of the answer.
    pub confidence: f64,
    /// When the entry was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl SessionEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(query: impl Into<String>, summary: impl Into<String>, confidence: f64) -> Self {
        Self {
            query: query.into(),
            summary: summary.into(),
            confidence,
            recorded_at: Utc::now(),
        }
    }
}

/// History and adaptive profile for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session identifier.
    pub session_id: String,
    /// Most recent entries, oldest first.
    pub history: VecDeque<SessionEntry>,
    /// Free-form adaptive tags.
    pub profile: BTreeMap<String, String>,
    /// When the session was first seen.
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            history: VecDeque::new(),
            profile: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Appends an entry, dropping the oldest ones beyond `limit`.
    pub fn push(&mut self, entry: SessionEntry, limit: usize) {
        self.history.push_back(entry);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_drops_oldest() {
        let mut record = SessionRecord::new("s1");
        for i in 0..5 {
            record.push(SessionEntry::new(format!("q{i}"), "a", 50.0), 3);
        }
        assert_eq!(record.history.len(), 3);
        let queries: Vec<&str> = record.history.iter().map(|e| e.query.as_str()).collect();
        assert_eq!(queries, vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn test_zero_limit_keeps_nothing() {
        let mut record = SessionRecord::new("s1");
        record.push(SessionEntry::new("q", "a", 10.0), 0);
        assert!(record.history.is_empty());
    }
}
