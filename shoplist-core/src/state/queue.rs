use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A state write not yet flushed to storage.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncQueueEntry {
    pub key: String,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

/// FIFO buffer of deferred writes.
///
/// Drained with copy-then-clear, so entries queued while a sync is running
/// wait for the next one.
#[derive(Debug, Default)]
pub struct SyncQueue {
    entries: Mutex<VecDeque<SyncQueueEntry>>,
}

impl SyncQueue {
    pub fn push(&self, key: &str, value: Value) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push_back(SyncQueueEntry {
                key: key.to_string(),
                value,
                timestamp: Utc::now(),
            });
        }
    }

    /// Takes every queued entry, oldest first.
    pub fn take_all(&self) -> Vec<SyncQueueEntry> {
        self.entries
            .lock()
            .map(|mut entries| entries.drain(..).collect())
            .unwrap_or_default()
    }

    /// Puts entries from a failed sync back ahead of anything queued since.
    pub fn restore_front(&self, restored: Vec<SyncQueueEntry>) {
        if let Ok(mut entries) = self.entries.lock() {
            for entry in restored.into_iter().rev() {
                entries.push_front(entry);
            }
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.iter().any(|e| e.key == key))
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
