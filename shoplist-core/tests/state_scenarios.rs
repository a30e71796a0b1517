//! End-to-end behavior of the state manager over the storage facade.

use async_trait::async_trait;
use serde_json::{json, Value};
use shoplist_core::storage::StoredRecord;
use shoplist_core::{
    BackendError, BackendKind, HostEnvironment, HostEvents, Lifecycle, LifecycleEvent,
    LifecycleEventSource, LocalStore, ScriptedEvents, StateEvent, StateManager, Storage,
    StorageBackend, SyncOutcome, UserTracker, WriteOptions, WriteOutcome,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Stores values in memory, counts writes and takes a while to do so.
#[derive(Default)]
struct SlowCountingBackend {
    values: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
}

#[async_trait]
impl StorageBackend for SlowCountingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set(
        &self,
        record: &StoredRecord,
        _options: WriteOptions,
    ) -> Result<WriteOutcome, BackendError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.values
            .lock()
            .unwrap()
            .insert(record.key.clone(), record.encoded_value.clone());
        Ok(WriteOutcome::Written)
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.values.lock().unwrap().keys().cloned().collect())
    }

    async fn clear(&self) -> Result<usize, BackendError> {
        let mut values = self.values.lock().unwrap();
        let count = values.len();
        values.clear();
        Ok(count)
    }
}

fn services(storage: Storage) -> Arc<StateManager> {
    let storage = Arc::new(storage);
    let tracker = Arc::new(UserTracker::new(
        storage.clone(),
        HostEnvironment::fixed("test"),
    ));
    Arc::new(StateManager::new(storage, tracker))
}

async fn tab(local: &Arc<LocalStore>) -> Arc<StateManager> {
    let manager = services(Storage::in_memory_sharing("test", local.clone()).await);
    manager.initialize().await;
    manager
}

#[tokio::test]
async fn test_overlapping_syncs_write_once() {
    let backend = Arc::new(SlowCountingBackend::default());
    let manager = services(Storage::with_backends("test", vec![backend.clone()]));
    manager.initialize().await;
    manager
        .set_state("theme", json!("dark"), Default::default())
        .await;
    backend.writes.store(0, Ordering::SeqCst);

    let (first, second) = tokio::join!(manager.sync_state("first"), manager.sync_state("second"));

    assert_eq!(first, SyncOutcome::Completed { flushed: 1 });
    assert_eq!(second, SyncOutcome::Skipped);
    // One write per state key, from the first sync only.
    assert_eq!(backend.writes.load(Ordering::SeqCst), manager.keys().len());
    assert!(!manager.is_syncing());

    // The flag is cleared, so the next sync runs.
    assert_eq!(
        manager.sync_state("third").await,
        SyncOutcome::Completed { flushed: 0 }
    );
}

#[tokio::test]
async fn test_failed_sync_requeues_entries() {
    let manager = services(Storage::with_backends("test", Vec::new()));
    manager.initialize().await;
    manager
        .set_state("theme", json!("dark"), Default::default())
        .await;

    // With no backends nothing is attempted, so nothing fails.
    assert_eq!(
        manager.sync_state("test").await,
        SyncOutcome::Completed { flushed: 1 }
    );

    let local = Arc::new(LocalStore::in_memory(1 << 20));
    local.set_available(false);
    let manager = services(
        Storage::builder("test")
            .local_store(local)
            .without_session()
            .build(),
    );
    manager.initialize().await;
    manager
        .set_state("theme", json!("dark"), Default::default())
        .await;

    assert_eq!(manager.sync_state("test").await, SyncOutcome::Failed);
    assert_eq!(manager.pending_writes(), 1);
    assert_eq!(manager.get_theme(), json!("dark"));
}

#[tokio::test]
async fn test_restore_without_state_changes_nothing() {
    let local = Arc::new(LocalStore::in_memory(1 << 20));
    let manager = tab(&local).await;
    manager.add_list(json!({"name": "Groceries"})).await.unwrap();
    manager.set_theme(json!("dark"), false).await;

    let before = serde_json::to_string(&manager.create_backup().await.state).unwrap();
    let pending = manager.pending_writes();

    assert!(!manager.restore_from_backup(&json!({})).await);
    assert!(!manager.restore_from_backup(&json!({"state": null})).await);

    let after = serde_json::to_string(&manager.create_backup().await.state).unwrap();
    assert_eq!(before, after);
    assert_eq!(manager.pending_writes(), pending);
}

#[tokio::test]
async fn test_theme_survives_reload() {
    let local = Arc::new(LocalStore::in_memory(1 << 20));
    let first = tab(&local).await;
    first.set_theme(json!("dark"), false).await;
    first.sync_state("background").await;

    // A new facade and manager over the same durable store.
    let reloaded = tab(&local).await;
    assert_eq!(reloaded.get_theme(), json!("dark"));

    // Reloading in place keeps it too.
    first.load_state().await;
    assert_eq!(first.get_theme(), json!("dark"));
}

#[tokio::test]
async fn test_added_list_is_stamped_and_removal_is_persisted() {
    let local = Arc::new(LocalStore::in_memory(1 << 20));
    let manager = tab(&local).await;

    let list = manager.add_list(json!({"name": "Groceries"})).await.unwrap();
    let stored = serde_json::to_value(&list).unwrap();
    assert!(!list.id.is_empty());
    assert!(stored.get("createdAt").is_some());
    assert!(stored.get("updatedAt").is_some());
    assert_eq!(manager.get_lists().len(), 1);

    assert!(manager.remove_list(&list.id).await.unwrap());
    assert!(manager.get_lists().iter().all(|l| l.id != list.id));

    let fresh = Storage::in_memory_sharing("fresh", local).await;
    let lists = fresh.get_item("shopping_lists").await.unwrap();
    assert_eq!(lists, json!([]));
}

#[tokio::test]
async fn test_external_change_reloads_other_tab() {
    let local = Arc::new(LocalStore::in_memory(1 << 20));
    let tab_a = tab(&local).await;
    let tab_b = tab(&local).await;

    let reloads = Arc::new(AtomicUsize::new(0));
    let r = reloads.clone();
    tab_b.subscribe("theme", move |event| {
        if *event == StateEvent::Reloaded {
            r.fetch_add(1, Ordering::SeqCst);
        }
    });

    let mut lifecycle = Lifecycle::new();
    lifecycle.register(tab_b.clone());
    lifecycle.register(tab_b.tracker().clone());

    let mut source = HostEvents::new(
        Duration::from_secs(3600),
        Some(local.clone()),
        tab_b.storage().tab_id(),
    )
    .without_ctrl_c();

    tab_a.set_theme(json!("dark"), true).await;
    assert_eq!(tab_b.get_theme(), json!("light"));

    let event = source.next_event().await.unwrap();
    assert_eq!(event, LifecycleEvent::ExternalChange("shoplist:app_theme".into()));
    lifecycle.dispatch(&event).await;

    assert_eq!(tab_b.get_theme(), json!("dark"));
    assert_eq!(reloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_own_writes_do_not_signal_own_tab() {
    let local = Arc::new(LocalStore::in_memory(1 << 20));
    let manager = tab(&local).await;
    let (tx, mut other) = shoplist_core::ChannelEvents::new();

    let mut source = HostEvents::new(
        Duration::from_secs(3600),
        Some(local.clone()),
        manager.storage().tab_id(),
    )
    .without_ctrl_c();

    manager.set_theme(json!("dark"), true).await;
    tx.send(LifecycleEvent::Unload).unwrap();

    // Our own writes are filtered out, so only the channel yields.
    let next = tokio::select! {
        event = source.next_event() => event,
        event = other.next_event() => event,
    };
    assert_eq!(next, Some(LifecycleEvent::Unload));
}

#[tokio::test]
async fn test_lifecycle_drives_sync_and_flush() {
    let local = Arc::new(LocalStore::in_memory(1 << 20));
    let manager = tab(&local).await;
    manager.tracker().init().await;
    manager.tracker().set_preference("language", json!("nl-NL")).await;
    manager.set_theme(json!("dark"), false).await;
    assert_eq!(manager.pending_writes(), 1);

    let mut lifecycle = Lifecycle::new();
    lifecycle.register(manager.clone());
    lifecycle.register(manager.tracker().clone());

    let mut events = ScriptedEvents::new([
        LifecycleEvent::Foreground,
        LifecycleEvent::Background,
        LifecycleEvent::Unload,
    ]);
    assert_eq!(lifecycle.run(&mut events).await, 3);

    assert_eq!(manager.pending_writes(), 0);
    assert!(manager.last_sync_time().is_some());
    let log = manager.tracker().activity_log();
    assert_eq!(log.last().map(|e| e.activity.as_str()), Some("session_end"));
    assert!(log.iter().any(|e| e.activity == "app_foreground"));

    let fresh = Storage::in_memory_sharing("fresh", local).await;
    assert_eq!(fresh.get_item("app_theme").await, Some(json!("dark")));
    let prefs: Value = fresh.get_item("user_preferences").await.unwrap();
    assert_eq!(prefs["language"], "nl-NL");
}
