use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

use super::lists::{ListItem, ShoppingList};
use super::queue::SyncQueue;
use super::subscribers::{StateEvent, Subscribers, Subscription};
use super::{state_key_for, state_keys, storage_key};
use crate::identity::{UserInfo, UserTracker};
use crate::lifecycle::LifecycleListener;
use crate::storage::{keys, logical_key, Storage, StorageHealth, WriteOptions};

pub const BACKUP_VERSION: &str = "2.0";
pub const THEME_EXPORT_VERSION: &str = "1.0";

/// Keys persisted on every write, never queued.
const ALWAYS_IMMEDIATE: [&str; 2] = [state_keys::LISTS, state_keys::USER];

/// Persisted keys removed by a reset.
const RESET_KEYS: [&str; 4] = [
    keys::SHOPPING_LISTS,
    keys::APP_THEME,
    keys::UI_STATE,
    keys::APP_STATE,
];

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Invalid list: {0}")]
    InvalidList(String),

    #[error("Backup has no state")]
    MissingState,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Persist before returning instead of queueing for the next sync.
    pub immediate: bool,
}

impl SetOptions {
    pub fn immediate() -> Self {
        Self { immediate: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every key was written; `flushed` queued entries were drained.
    Completed { flushed: usize },
    /// Another sync was already running.
    Skipped,
    /// At least one key reached no backend; drained entries were requeued.
    Failed,
}

/// Snapshot written by `create_backup` and read by `restore_from_backup`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateBackup {
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub state: BTreeMap<String, Value>,
    #[serde(default)]
    pub user_info: Option<UserInfo>,
    #[serde(default)]
    pub storage_health: Option<StorageHealth>,
}

/// Clears the in-flight flag however the sync ends.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// In-memory application state mirrored to storage.
pub struct StateManager {
    storage: Arc<Storage>,
    tracker: Arc<UserTracker>,
    state: RwLock<BTreeMap<String, Value>>,
    queue: SyncQueue,
    subscribers: Arc<Subscribers>,
    syncing: AtomicBool,
    initialized: AtomicBool,
    last_sync: Mutex<Option<DateTime<Utc>>>,
}

impl StateManager {
    pub fn new(storage: Arc<Storage>, tracker: Arc<UserTracker>) -> Self {
        Self {
            storage,
            tracker,
            state: RwLock::new(BTreeMap::new()),
            queue: SyncQueue::default(),
            subscribers: Arc::new(Subscribers::default()),
            syncing: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            last_sync: Mutex::new(None),
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn tracker(&self) -> &Arc<UserTracker> {
        &self.tracker
    }

    /// Loads persisted state, filling anything missing with defaults.
    /// Only the first call does any work.
    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return;
        }
        let loaded = self.load_state().await;
        self.initialize_default_state();
        tracing::info!("State initialized, {} keys loaded from storage", loaded);
    }

    /// Reads every known key from storage into memory.
    ///
    /// Keys with queued writes keep their in-memory value. Returns the
    /// number of keys loaded.
    pub async fn load_state(&self) -> usize {
        let mut keys: Vec<String> = state_keys::ALL.iter().map(|k| k.to_string()).collect();
        for key in self.keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }

        let mut loaded = 0;
        for key in keys {
            if self.queue.contains_key(&key) {
                continue;
            }
            if let Some(value) = self.storage.get_item(&storage_key(&key)).await {
                self.write_memory(&key, value);
                loaded += 1;
            }
        }
        tracing::debug!("Loaded {} state keys", loaded);
        loaded
    }

    /// Sets a default for every well-known key that has no value.
    pub fn initialize_default_state(&self) {
        if let Ok(mut state) = self.state.write() {
            for key in state_keys::ALL {
                if !state.contains_key(key) {
                    state.insert(key.to_string(), default_value(key));
                }
            }
        }
    }

    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.state.read().ok()?.get(key).cloned()
    }

    /// Every key currently held in memory.
    pub fn keys(&self) -> Vec<String> {
        self.state
            .read()
            .map(|state| state.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Updates memory and notifies subscribers. Immediate writes (and every
    /// write to `lists` or `user`) are persisted first; the rest are queued.
    pub async fn set_state(&self, key: &str, value: Value, options: SetOptions) {
        let immediate = options.immediate || ALWAYS_IMMEDIATE.contains(&key);
        self.write_memory(key, value.clone());

        if immediate {
            self.storage
                .set_item(&storage_key(key), value.clone(), WriteOptions::critical())
                .await;
        } else {
            self.queue.push(key, value.clone());
        }

        self.subscribers.notify(&StateEvent::Changed {
            key: key.to_string(),
            value,
        });
    }

    /// Sets a key to the result of applying `updater` to its current value.
    pub async fn update_state<F>(&self, key: &str, updater: F, options: SetOptions) -> Value
    where
        F: FnOnce(Option<Value>) -> Value,
    {
        let value = updater(self.get_state(key));
        self.set_state(key, value.clone(), options).await;
        value
    }

    pub fn subscribe<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(key, Arc::new(callback))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Drains the queue and re-persists the whole state map. A call made
    /// while another sync is running returns `Skipped` without writing.
    pub async fn sync_state(&self, reason: &str) -> SyncOutcome {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync ({}) skipped, another sync is running", reason);
            return SyncOutcome::Skipped;
        }
        let _guard = SyncGuard(&self.syncing);

        let drained = self.queue.take_all();
        let snapshot: Vec<(String, Value)> = match self.state.read() {
            Ok(state) => state.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Err(_) => Vec::new(),
        };

        let mut failed = Vec::new();
        for (key, value) in snapshot {
            let report = self
                .storage
                .set_item(&storage_key(&key), value, WriteOptions::default())
                .await;
            if report.is_total_failure() {
                failed.push(key);
            }
        }

        if !failed.is_empty() {
            tracing::warn!("Sync ({}) failed for {:?}, requeueing", reason, failed);
            self.queue.restore_front(drained);
            return SyncOutcome::Failed;
        }

        if let Ok(mut last) = self.last_sync.lock() {
            *last = Some(Utc::now());
        }
        tracing::debug!("Sync ({}) flushed {} queued writes", reason, drained.len());
        SyncOutcome::Completed {
            flushed: drained.len(),
        }
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.last_sync.lock().ok().and_then(|last| *last)
    }

    /// Queued writes not yet flushed.
    pub fn pending_writes(&self) -> usize {
        self.queue.len()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Drops cached copies of every state key and reloads them from the
    /// backends, then tells all subscribers.
    pub async fn reload_from_storage(&self) -> usize {
        for key in self.keys() {
            self.storage.invalidate(&storage_key(&key));
        }
        let loaded = self.load_state().await;
        self.subscribers.notify(&StateEvent::Reloaded);
        tracing::info!("Reloaded {} state keys from storage", loaded);
        loaded
    }

    pub fn get_lists(&self) -> Vec<ShoppingList> {
        let Some(Value::Array(entries)) = self.get_state(state_keys::LISTS) else {
            return Vec::new();
        };
        entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(list) => Some(list),
                Err(e) => {
                    tracing::warn!("Skipping malformed shopping list: {}", e);
                    None
                }
            })
            .collect()
    }

    pub fn get_list(&self, id: &str) -> Option<ShoppingList> {
        self.get_lists().into_iter().find(|l| l.id == id)
    }

    /// Finds a list by id, or by name (case-insensitive).
    pub fn find_list(&self, id_or_name: &str) -> Option<ShoppingList> {
        let lower = id_or_name.to_lowercase();
        let lists = self.get_lists();
        lists
            .iter()
            .find(|l| l.id == id_or_name)
            .or_else(|| lists.iter().find(|l| l.name.to_lowercase() == lower))
            .cloned()
    }

    /// Adds a list built from `draft`, which must be an object with a name.
    pub async fn add_list(&self, draft: Value) -> Result<ShoppingList, StateError> {
        let list = ShoppingList::from_draft(draft).map_err(StateError::InvalidList)?;
        let entry = serde_json::to_value(&list)?;
        self.modify_lists(move |entries| {
            entries.push(entry);
            Ok(())
        })
        .await?;
        tracing::info!("Added list {} ({})", list.name, list.id);
        Ok(list)
    }

    /// Applies `update` to a list and stamps `updatedAt`.
    pub async fn update_list<F>(&self, id: &str, update: F) -> Result<Option<ShoppingList>, StateError>
    where
        F: FnOnce(&mut ShoppingList),
    {
        if self.get_list(id).is_none() {
            return Ok(None);
        }
        self.modify_lists(|entries| {
            let Some(entry) = entries.iter_mut().find(|e| has_list_id(e, id)) else {
                return Ok(None);
            };
            let mut list: ShoppingList = serde_json::from_value(entry.clone())?;
            update(&mut list);
            list.id = id.to_string();
            list.touch();
            *entry = serde_json::to_value(&list)?;
            Ok(Some(list))
        })
        .await
    }

    pub async fn remove_list(&self, id: &str) -> Result<bool, StateError> {
        if self.get_list(id).is_none() {
            return Ok(false);
        }
        self.modify_lists(|entries| {
            entries.retain(|e| !has_list_id(e, id));
            Ok(())
        })
        .await?;
        tracing::info!("Removed list {}", id);
        Ok(true)
    }

    /// `None` if the list does not exist, otherwise whether the item was new.
    pub async fn add_list_item(&self, list_id: &str, item: ListItem) -> Result<Option<bool>, StateError> {
        let mut added = false;
        let updated = self
            .update_list(list_id, |list| added = list.add_item(item))
            .await?;
        Ok(updated.map(|_| added))
    }

    /// `None` if the list does not exist, otherwise whether an item was removed.
    pub async fn remove_list_item(&self, list_id: &str, name: &str) -> Result<Option<bool>, StateError> {
        let mut removed = false;
        let updated = self
            .update_list(list_id, |list| removed = list.remove_item(name))
            .await?;
        Ok(updated.map(|_| removed))
    }

    /// Flips an item's checked state. `None` if the list or item is missing.
    pub async fn toggle_list_item(&self, list_id: &str, name: &str) -> Result<Option<bool>, StateError> {
        match self.get_list(list_id) {
            Some(list) if list.find_item(name).is_some() => {}
            _ => return Ok(None),
        }
        let mut checked = None;
        self.update_list(list_id, |list| checked = list.toggle(name))
            .await?;
        Ok(checked)
    }

    /// Edits the raw stored entries. Entries the typed view cannot read
    /// are passed through untouched.
    async fn modify_lists<R>(
        &self,
        modify: impl FnOnce(&mut Vec<Value>) -> Result<R, StateError>,
    ) -> Result<R, StateError> {
        let mut entries = match self.get_state(state_keys::LISTS) {
            Some(Value::Array(entries)) => entries,
            None | Some(Value::Null) => Vec::new(),
            Some(_) => {
                return Err(StateError::InvalidList(
                    "stored lists are not an array".to_string(),
                ))
            }
        };
        let result = modify(&mut entries)?;
        self.set_state(
            state_keys::LISTS,
            Value::Array(entries),
            SetOptions::immediate(),
        )
        .await;
        Ok(result)
    }

    pub async fn set_theme(&self, theme: Value, immediate: bool) {
        self.set_state(state_keys::THEME, theme, SetOptions { immediate })
            .await;
    }

    pub fn get_theme(&self) -> Value {
        self.get_state(state_keys::THEME)
            .unwrap_or_else(|| default_value(state_keys::THEME))
    }

    /// The theme plus `exportedAt` and `version`. A non-object theme is
    /// wrapped as `{"theme": ...}`.
    pub fn export_theme(&self) -> Value {
        let mut export = match self.get_theme() {
            Value::Object(fields) => fields,
            other => {
                let mut fields = Map::new();
                fields.insert("theme".to_string(), other);
                fields
            }
        };
        export.insert("exportedAt".to_string(), json!(Utc::now()));
        export.insert("version".to_string(), json!(THEME_EXPORT_VERSION));
        Value::Object(export)
    }

    /// Merges `patch` into the UI state object.
    pub async fn set_ui_state(&self, patch: Map<String, Value>) {
        self.update_state(
            state_keys::UI,
            |current| {
                let mut ui = match current {
                    Some(Value::Object(fields)) => fields,
                    _ => Map::new(),
                };
                ui.extend(patch);
                Value::Object(ui)
            },
            SetOptions::default(),
        )
        .await;
    }

    pub fn get_ui_state(&self) -> Value {
        self.get_state(state_keys::UI)
            .unwrap_or_else(|| default_value(state_keys::UI))
    }

    pub async fn create_backup(&self) -> StateBackup {
        let state = self.state.read().map(|s| s.clone()).unwrap_or_default();
        StateBackup {
            timestamp: Utc::now(),
            version: BACKUP_VERSION.to_string(),
            state,
            user_info: Some(self.tracker.get_user_info().await),
            storage_health: Some(self.storage.storage_health()),
        }
    }

    /// Restores the state map from a backup. Returns `false` without touching
    /// anything if the backup has no `state` object.
    pub async fn restore_from_backup(&self, backup: &Value) -> bool {
        let Some(Value::Object(restored)) = backup.get("state") else {
            tracing::warn!("Backup has no state, nothing restored");
            return false;
        };

        for (key, value) in restored {
            self.write_memory(key, value.clone());
        }
        for (key, value) in restored {
            self.storage
                .set_item(&storage_key(key), value.clone(), WriteOptions::critical())
                .await;
        }

        if let Some(name) = backup.pointer("/userInfo/name").and_then(Value::as_str) {
            if let Err(e) = self.tracker.set_user_name(name).await {
                tracing::warn!("Skipping user name from backup: {}", e);
            }
        }

        self.subscribers.notify(&StateEvent::Restored);
        tracing::info!("Restored {} state keys from backup", restored.len());
        true
    }

    /// Writes a backup as pretty JSON, replacing the file atomically.
    pub async fn write_backup_file(&self, path: &Path) -> Result<StateBackup, StateError> {
        let backup = self.create_backup().await;
        let json = serde_json::to_string_pretty(&backup)?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;

        tracing::info!("Wrote backup to {}", path.display());
        Ok(backup)
    }

    pub async fn read_backup_file(&self, path: &Path) -> Result<(), StateError> {
        let text = tokio::fs::read_to_string(path).await?;
        let backup: Value = serde_json::from_str(&text)?;
        if self.restore_from_backup(&backup).await {
            Ok(())
        } else {
            Err(StateError::MissingState)
        }
    }

    /// Clears all state and the user's name, then reinstates defaults.
    /// Irreversible.
    pub async fn reset_state(&self) {
        let mut stored: Vec<String> = RESET_KEYS.iter().map(|k| k.to_string()).collect();
        if let Ok(mut state) = self.state.write() {
            for key in state.keys() {
                let key = storage_key(key);
                if !stored.contains(&key) {
                    stored.push(key);
                }
            }
            state.clear();
        }
        self.queue.clear();

        // Every key held in memory goes too, or the next load brings it back.
        for key in &stored {
            self.storage.remove_item(key).await;
        }
        self.tracker.clear_user_name().await;

        self.initialize_default_state();
        self.subscribers.notify(&StateEvent::Reset);
        tracing::info!("State reset to defaults");
    }

    /// Final sync, then drops every subscriber.
    pub async fn dispose(&self) {
        self.sync_state("dispose").await;
        self.subscribers.clear();
    }

    fn write_memory(&self, key: &str, value: Value) {
        if let Ok(mut state) = self.state.write() {
            state.insert(key.to_string(), value);
        }
    }
}

#[async_trait]
impl LifecycleListener for StateManager {
    async fn on_foreground(&self) {
        self.load_state().await;
    }

    async fn on_background(&self) {
        self.sync_state("background").await;
    }

    async fn on_external_change(&self, physical_key: &str) {
        if logical_key(physical_key).and_then(state_key_for).is_some() {
            self.reload_from_storage().await;
        }
    }

    async fn on_interval_tick(&self) {
        self.sync_state("interval").await;
    }

    async fn on_unload(&self) {
        self.sync_state("unload").await;
    }
}

fn has_list_id(entry: &Value, id: &str) -> bool {
    entry.get("id").and_then(Value::as_str) == Some(id)
}

fn default_value(key: &str) -> Value {
    match key {
        state_keys::LISTS => json!([]),
        state_keys::THEME => json!("light"),
        state_keys::APP => json!({ "version": env!("CARGO_PKG_VERSION") }),
        _ => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::HostEnvironment;
    use std::sync::atomic::AtomicUsize;

    async fn manager() -> StateManager {
        let storage = Arc::new(Storage::in_memory("test").await);
        let tracker = Arc::new(UserTracker::new(
            storage.clone(),
            HostEnvironment::fixed("test"),
        ));
        let manager = StateManager::new(storage, tracker);
        manager.initialize().await;
        manager
    }

    #[tokio::test]
    async fn test_defaults_after_initialize() {
        let manager = manager().await;
        assert_eq!(manager.get_theme(), json!("light"));
        assert!(manager.get_lists().is_empty());
        assert_eq!(manager.get_ui_state(), json!({}));
        assert_eq!(manager.keys().len(), state_keys::ALL.len());
    }

    #[tokio::test]
    async fn test_deferred_write_is_queued() {
        let manager = manager().await;
        manager
            .set_state("theme", json!("dark"), SetOptions::default())
            .await;
        assert_eq!(manager.get_theme(), json!("dark"));
        assert_eq!(manager.pending_writes(), 1);

        assert_eq!(
            manager.sync_state("test").await,
            SyncOutcome::Completed { flushed: 1 }
        );
        assert_eq!(manager.pending_writes(), 0);
        assert!(manager.last_sync_time().is_some());
    }

    #[tokio::test]
    async fn test_lists_are_never_queued() {
        let manager = manager().await;
        manager
            .set_state("lists", json!([]), SetOptions::default())
            .await;
        assert_eq!(manager.pending_writes(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let manager = manager().await;
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let subscription = manager.subscribe("theme", move |event| {
            if matches!(event, StateEvent::Changed { .. }) {
                s.fetch_add(1, Ordering::SeqCst);
            }
        });

        manager.set_theme(json!("dark"), false).await;
        subscription.unsubscribe();
        manager.set_theme(json!("light"), false).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_update_state() {
        let manager = manager().await;
        manager
            .set_state("counter", json!(1), SetOptions::default())
            .await;
        let value = manager
            .update_state(
                "counter",
                |v| json!(v.and_then(|v| v.as_i64()).unwrap_or(0) + 1),
                SetOptions::immediate(),
            )
            .await;
        assert_eq!(value, json!(2));
        assert_eq!(
            manager.storage().get_item("state_counter").await,
            Some(json!(2))
        );
    }

    #[tokio::test]
    async fn test_list_helpers() {
        let manager = manager().await;
        let list = manager.add_list(json!({"name": "Groceries"})).await.unwrap();

        assert_eq!(
            manager.add_list_item(&list.id, ListItem::new("Eggs")).await.unwrap(),
            Some(true)
        );
        assert_eq!(
            manager.add_list_item(&list.id, ListItem::new("eggs")).await.unwrap(),
            Some(false)
        );
        assert_eq!(
            manager.toggle_list_item(&list.id, "EGGS").await.unwrap(),
            Some(true)
        );
        assert_eq!(manager.toggle_list_item(&list.id, "milk").await.unwrap(), None);
        assert_eq!(manager.toggle_list_item("nope", "eggs").await.unwrap(), None);

        let renamed = manager
            .update_list(&list.id, |l| l.name = "Weekly".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.name, "Weekly");
        assert!(renamed.updated_at >= list.updated_at);
        assert_eq!(manager.find_list("weekly").unwrap().id, list.id);

        assert_eq!(
            manager.remove_list_item(&list.id, "Eggs").await.unwrap(),
            Some(true)
        );
        assert!(manager.remove_list(&list.id).await.unwrap());
        assert!(!manager.remove_list(&list.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_edits_keep_unreadable_entries() {
        let manager = manager().await;
        let legacy = json!({"name": "Legacy", "items": []});
        manager
            .set_state("lists", json!([legacy.clone()]), SetOptions::default())
            .await;

        let list = manager.add_list(json!({"name": "New"})).await.unwrap();
        manager
            .add_list_item(&list.id, ListItem::new("Eggs"))
            .await
            .unwrap();
        let stored = manager.storage().get_item("shopping_lists").await.unwrap();
        assert_eq!(stored.as_array().map(Vec::len), Some(2));
        assert_eq!(stored[0], legacy);

        assert!(manager.remove_list(&list.id).await.unwrap());
        assert_eq!(manager.get_state("lists"), Some(json!([legacy])));
        assert!(manager.get_lists().is_empty());
    }

    #[tokio::test]
    async fn test_list_edits_reject_non_array_state() {
        let manager = manager().await;
        manager
            .set_state("lists", json!({"weekly": []}), SetOptions::default())
            .await;

        let err = manager.add_list(json!({"name": "New"})).await.unwrap_err();
        assert!(matches!(err, StateError::InvalidList(_)));
        assert_eq!(manager.get_state("lists"), Some(json!({"weekly": []})));
    }

    #[tokio::test]
    async fn test_add_list_rejects_nameless_draft() {
        let manager = manager().await;
        let err = manager.add_list(json!({"items": []})).await.unwrap_err();
        assert!(matches!(err, StateError::InvalidList(_)));
        assert!(manager.get_lists().is_empty());
    }

    #[tokio::test]
    async fn test_set_ui_state_merges() {
        let manager = manager().await;
        let mut patch = Map::new();
        patch.insert("sidebarOpen".to_string(), json!(true));
        manager.set_ui_state(patch).await;
        let mut patch = Map::new();
        patch.insert("activeList".to_string(), json!("list_1"));
        manager.set_ui_state(patch).await;

        assert_eq!(
            manager.get_ui_state(),
            json!({"sidebarOpen": true, "activeList": "list_1"})
        );
    }

    #[tokio::test]
    async fn test_export_theme() {
        let manager = manager().await;
        manager
            .set_theme(json!({"mode": "dark", "accent": "#2f855a"}), true)
            .await;
        let export = manager.export_theme();
        assert_eq!(export["mode"], "dark");
        assert_eq!(export["version"], "1.0");
        assert!(export.get("exportedAt").is_some());

        manager.set_theme(json!("dark"), true).await;
        assert_eq!(manager.export_theme()["theme"], "dark");
    }

    #[tokio::test]
    async fn test_backup_round_trip() {
        let manager = manager().await;
        manager.add_list(json!({"name": "Groceries"})).await.unwrap();
        manager.set_theme(json!("dark"), true).await;
        let backup = serde_json::to_value(manager.create_backup().await).unwrap();
        assert_eq!(backup["version"], "2.0");
        assert!(backup.get("storageHealth").is_some());

        let other = self::manager().await;
        assert!(other.restore_from_backup(&backup).await);
        assert_eq!(other.get_theme(), json!("dark"));
        assert_eq!(other.get_lists().len(), 1);
    }

    #[tokio::test]
    async fn test_backup_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");

        let manager = manager().await;
        manager.set_theme(json!("dark"), true).await;
        manager.write_backup_file(&path).await.unwrap();

        let other = self::manager().await;
        other.read_backup_file(&path).await.unwrap();
        assert_eq!(other.get_theme(), json!("dark"));

        std::fs::write(&path, "{}").unwrap();
        assert!(matches!(
            other.read_backup_file(&path).await,
            Err(StateError::MissingState)
        ));
    }

    #[tokio::test]
    async fn test_reset_state() {
        let manager = manager().await;
        manager.tracker().init().await;
        manager.tracker().set_user_name("Alice").await.unwrap();
        manager.add_list(json!({"name": "Groceries"})).await.unwrap();
        manager.set_theme(json!("dark"), false).await;

        let resets = Arc::new(AtomicUsize::new(0));
        let r = resets.clone();
        manager.subscribe("theme", move |event| {
            if *event == StateEvent::Reset {
                r.fetch_add(1, Ordering::SeqCst);
            }
        });

        manager.reset_state().await;
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert_eq!(manager.get_theme(), json!("light"));
        assert!(manager.get_lists().is_empty());
        assert_eq!(manager.pending_writes(), 0);
        assert_eq!(manager.tracker().get_user_name(), None);
        assert_eq!(manager.storage().get_item("shopping_lists").await, None);
        // Identity survives a reset.
        assert!(manager.storage().get_item("user_id").await.is_some());
    }

    #[tokio::test]
    async fn test_reset_survives_foreground_reload() {
        let manager = manager().await;
        manager.tracker().init().await;
        manager
            .set_state("user", json!({"favorite": "milk"}), SetOptions::default())
            .await;
        manager
            .set_state("recent", json!(["eggs"]), SetOptions::immediate())
            .await;

        manager.reset_state().await;
        manager.on_foreground().await;

        assert_eq!(manager.get_state("user"), Some(json!({})));
        assert_eq!(manager.get_state("recent"), None);
        assert_eq!(manager.storage().get_item("user_state").await, None);
        assert_eq!(manager.storage().get_item("state_recent").await, None);
    }

    #[tokio::test]
    async fn test_dispose_drops_subscribers() {
        let manager = manager().await;
        manager.subscribe("theme", |_| {});
        manager.dispose().await;
        assert_eq!(manager.subscriber_count(), 0);
    }
}
