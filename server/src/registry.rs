//! Keyed map of live call sessions.

use std::sync::Arc;

use dashmap::DashMap;

use crate::session::CallSession;

/// The registry every connection and every speak command goes through.
pub type SessionRegistry = Registry<CallSession>;

/// Concurrent `call id -> session` map.
///
/// Entries are handed out as `Arc`s and the shard lock is released before
/// returning, so callers never hold a map guard while touching a session.
pub struct Registry<T> {
    entries: Arc<DashMap<String, Arc<T>>>,
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Insert `entry` under `call_id`, returning the entry it displaced.
    pub fn register(&self, call_id: &str, entry: Arc<T>) -> Option<Arc<T>> {
        self.entries.insert(call_id.to_string(), entry)
    }

    pub fn lookup(&self, call_id: &str) -> Option<Arc<T>> {
        self.entries.get(call_id).map(|e| Arc::clone(e.value()))
    }

    /// Remove whatever is registered under `call_id`. Unknown ids are a no-op.
    pub fn remove(&self, call_id: &str) -> Option<Arc<T>> {
        self.entries.remove(call_id).map(|(_, entry)| entry)
    }

    /// Remove `call_id` only while it still maps to `entry`.
    pub fn remove_entry(&self, call_id: &str, entry: &Arc<T>) -> bool {
        self.entries
            .remove_if(call_id, |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
