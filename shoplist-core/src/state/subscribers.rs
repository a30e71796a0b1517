use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

/// Subscribing to this key receives changes to every key.
pub const ALL_KEYS: &str = "*";

/// Notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    /// One key was set.
    Changed { key: String, value: Value },
    /// State was reloaded from storage after another tab wrote it.
    Reloaded,
    /// State was reset to defaults.
    Reset,
    /// State was restored from a backup.
    Restored,
}

pub type Callback = Arc<dyn Fn(&StateEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: Mutex<u64>,
    by_key: Mutex<HashMap<String, Vec<(u64, Callback)>>>,
}

impl Subscribers {
    pub(crate) fn subscribe(self: &Arc<Self>, key: &str, callback: Callback) -> Subscription {
        let id = match self.next_id.lock() {
            Ok(mut next) => {
                *next += 1;
                *next
            }
            Err(_) => 0,
        };
        if let Ok(mut by_key) = self.by_key.lock() {
            by_key
                .entry(key.to_string())
                .or_default()
                .push((id, callback));
        }
        Subscription {
            id,
            key: key.to_string(),
            registry: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, key: &str, id: u64) {
        if let Ok(mut by_key) = self.by_key.lock() {
            if let Some(callbacks) = by_key.get_mut(key) {
                callbacks.retain(|(existing, _)| *existing != id);
                if callbacks.is_empty() {
                    by_key.remove(key);
                }
            }
        }
    }

    /// Delivers `Changed` to that key's and wildcard subscribers, and every
    /// other event to all subscribers.
    pub(crate) fn notify(&self, event: &StateEvent) {
        // Callbacks run outside the lock so they may subscribe or unsubscribe.
        let callbacks: Vec<Callback> = match self.by_key.lock() {
            Ok(by_key) => match event {
                StateEvent::Changed { key, .. } => [key.as_str(), ALL_KEYS]
                    .iter()
                    .filter_map(|k| by_key.get(*k))
                    .flatten()
                    .map(|(_, cb)| cb.clone())
                    .collect(),
                _ => by_key.values().flatten().map(|(_, cb)| cb.clone()).collect(),
            },
            Err(_) => return,
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::warn!("State subscriber panicked on {:?}", event);
            }
        }
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut by_key) = self.by_key.lock() {
            by_key.clear();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key
            .lock()
            .map(|by_key| by_key.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

/// Handle returned by `subscribe`. Dropping it keeps the subscription.
pub struct Subscription {
    id: u64,
    key: String,
    registry: Weak<Subscribers>,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.key, self.id);
        }
    }
}
