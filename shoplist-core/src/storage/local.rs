//! Durable keyed store, the native stand-in for `localStorage`.
//!
//! All entries live in one JSON map file that is rewritten atomically
//! (temp file + rename) on every mutation. Each mutation re-reads the file
//! first and applies only its own key on top, so writes by other processes
//! to other keys survive. The store enforces a byte quota and broadcasts a
//! [`StorageEvent`] for every mutation so other facades ("tabs") sharing the
//! store can reload.
//!
//! Storage layout:
//! ```text
//! <data_dir>/
//! └── local_storage.json   # {"shoplist:shopping_lists": "<envelope>", ...}
//! ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::backend::{BackendError, BackendKind, StorageBackend, WriteOptions, WriteOutcome, PROBE_KEY};
use super::record::{Envelope, StoredRecord};
use super::{BACKUP_PREFIX, PRIMARY_PREFIX};

/// File name of the durable store inside the data directory.
pub const LOCAL_STORE_FILE: &str = "local_storage.json";

/// Default quota, matching the common browser limit.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

const EVENT_CAPACITY: usize = 256;

/// A mutation of the durable store, as seen by other tabs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Physical key that changed.
    pub key: String,
    /// New raw value, `None` on removal.
    pub new_value: Option<String>,
    /// Tab that performed the write; `Uuid::nil()` for external processes.
    pub source: Uuid,
}

/// Shared durable keyed store.
#[derive(Debug)]
pub struct LocalStore {
    path: Option<PathBuf>,
    quota_bytes: usize,
    entries: RwLock<BTreeMap<String, String>>,
    /// External changes picked up by a write, reported on the next refresh.
    unreported: Mutex<Vec<String>>,
    available: AtomicBool,
    events: broadcast::Sender<StorageEvent>,
}

impl LocalStore {
    /// Opens (or creates) the store file inside `data_dir`.
    ///
    /// A corrupt file is treated as empty rather than as an error.
    pub fn open(data_dir: &Path, quota_bytes: usize) -> Result<Self, BackendError> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(LOCAL_STORE_FILE);
        let entries = read_entries(&path)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            path: Some(path),
            quota_bytes,
            entries: RwLock::new(entries),
            unreported: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            events,
        })
    }

    /// A store that never touches the filesystem.
    pub fn in_memory(quota_bytes: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            path: None,
            quota_bytes,
            entries: RwLock::new(BTreeMap::new()),
            unreported: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            events,
        }
    }

    /// Returns the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Marks the store usable or not, as a host in private mode would.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Subscribes to mutation events.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.check_available()?;
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    pub fn set_item(&self, key: &str, value: &str, source: Uuid) -> Result<(), BackendError> {
        self.check_available()?;
        self.mutate(|entries| {
            let current = entries
                .get(key)
                .map(|v| key.len() + v.len())
                .unwrap_or(0);
            let needed = used_bytes(entries) - current + key.len() + value.len();
            if needed > self.quota_bytes {
                return Err(BackendError::QuotaExceeded {
                    kind: BackendKind::Durable,
                    needed,
                    limit: self.quota_bytes,
                });
            }

            entries.insert(key.to_string(), value.to_string());
            Ok(())
        })?;

        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            new_value: Some(value.to_string()),
            source,
        });
        Ok(())
    }

    pub fn remove_item(&self, key: &str, source: Uuid) -> Result<bool, BackendError> {
        self.check_available()?;
        let removed = self.mutate(|entries| Ok(entries.remove(key).is_some()))?;

        if removed {
            let _ = self.events.send(StorageEvent {
                key: key.to_string(),
                new_value: None,
                source,
            });
        }
        Ok(removed)
    }

    /// Physical keys starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        self.check_available()?;
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    /// Number of entries across all namespaces.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry, the way a host wipes storage under pressure.
    ///
    /// Does not broadcast: eviction is silent in browsers too.
    pub fn evict_all(&self) -> Result<usize, BackendError> {
        let count = self.mutate(|entries| {
            let count = entries.len();
            entries.clear();
            Ok(count)
        })?;
        tracing::info!("Evicted {} durable entries", count);
        Ok(count)
    }

    /// Re-reads the backing file and returns the primary-namespace keys that
    /// another process changed since the last read or write.
    pub fn refresh_from_disk(&self) -> Result<Vec<String>, BackendError> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        let on_disk = read_entries(path)?;
        let mut entries = self.entries.write().map_err(poisoned)?;

        let mut changed = changed_primary_keys(&entries, &on_disk);
        if let Ok(mut unreported) = self.unreported.lock() {
            changed.append(&mut unreported);
        }
        changed.sort();
        changed.dedup();

        *entries = on_disk;
        drop(entries);

        for key in &changed {
            let new_value = self.get_item(key).ok().flatten();
            let _ = self.events.send(StorageEvent {
                key: key.clone(),
                new_value,
                source: Uuid::nil(),
            });
        }
        Ok(changed)
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BackendError::Unavailable(BackendKind::Durable))
        }
    }

    /// Applies `change` to the latest on-disk entries and persists the
    /// result. The in-memory map is replaced only once the file is written.
    fn mutate<R>(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>) -> Result<R, BackendError>,
    ) -> Result<R, BackendError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let mut working = match &self.path {
            Some(path) => match parse_entries(path)? {
                Some(on_disk) => on_disk,
                None => entries.clone(),
            },
            None => entries.clone(),
        };
        let external = changed_primary_keys(&entries, &working);

        let result = change(&mut working)?;
        self.persist(&working)?;
        *entries = working;
        drop(entries);

        if !external.is_empty() {
            if let Ok(mut unreported) = self.unreported.lock() {
                unreported.extend(external);
            }
        }
        Ok(result)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), BackendError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(entries)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, String>, BackendError> {
    Ok(parse_entries(path)?.unwrap_or_default())
}

/// `None` if the file exists but does not parse.
fn parse_entries(path: &Path) -> Result<Option<BTreeMap<String, String>>, BackendError> {
    match fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(entries) => Ok(Some(entries)),
            Err(e) => {
                tracing::warn!(
                    "Ignoring corrupt durable store {}: {}",
                    path.display(),
                    e
                );
                Ok(None)
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Some(BTreeMap::new())),
        Err(e) => Err(BackendError::Io(e)),
    }
}

/// Primary-namespace keys whose value differs between two snapshots.
fn changed_primary_keys(
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> Vec<String> {
    after
        .iter()
        .filter(|(k, v)| before.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .chain(before.keys().filter(|k| !after.contains_key(*k)).cloned())
        .filter(|k| k.starts_with(PRIMARY_PREFIX))
        .collect()
}

fn used_bytes(entries: &BTreeMap<String, String>) -> usize {
    entries.iter().map(|(k, v)| k.len() + v.len()).sum()
}

fn poisoned<T>(_: T) -> BackendError {
    BackendError::Other("durable store lock poisoned".to_string())
}

/// Which half of the durable store a [`DurableBackend`] addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Primary,
    Backup,
}

impl Namespace {
    pub fn prefix(&self) -> &'static str {
        match self {
            Namespace::Primary => PRIMARY_PREFIX,
            Namespace::Backup => BACKUP_PREFIX,
        }
    }
}

/// One namespace view over a shared [`LocalStore`], owned by one tab.
#[derive(Debug, Clone)]
pub struct DurableBackend {
    store: Arc<LocalStore>,
    namespace: Namespace,
    tab_id: Uuid,
}

impl DurableBackend {
    pub fn new(store: Arc<LocalStore>, namespace: Namespace, tab_id: Uuid) -> Self {
        Self {
            store,
            namespace,
            tab_id,
        }
    }

    fn physical(&self, key: &str) -> String {
        format!("{}{}", self.namespace.prefix(), key)
    }
}

#[async_trait]
impl StorageBackend for DurableBackend {
    fn kind(&self) -> BackendKind {
        match self.namespace {
            Namespace::Primary => BackendKind::Durable,
            Namespace::Backup => BackendKind::DurableBackup,
        }
    }

    async fn probe(&self) -> bool {
        let key = self.physical(PROBE_KEY);
        let ok = self.store.set_item(&key, "1", self.tab_id).is_ok()
            && self.store.remove_item(&key, self.tab_id).is_ok();
        if !ok {
            tracing::warn!("{} storage probe failed", self.kind());
        }
        ok
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self
            .store
            .get_item(&self.physical(key))?
            .map(|raw| Envelope::unwrap_raw(&raw)))
    }

    async fn set(
        &self,
        record: &StoredRecord,
        _options: WriteOptions,
    ) -> Result<WriteOutcome, BackendError> {
        let raw = record.envelope().to_json()?;
        self.store
            .set_item(&self.physical(&record.key), &raw, self.tab_id)?;
        Ok(WriteOutcome::Written)
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.store.remove_item(&self.physical(key), self.tab_id)?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, BackendError> {
        let prefix = self.namespace.prefix();
        Ok(self
            .store
            .keys_with_prefix(prefix)?
            .into_iter()
            .filter_map(|k| k.strip_prefix(prefix).map(str::to_string))
            .collect())
    }

    async fn clear(&self) -> Result<usize, BackendError> {
        let keys = self.store.keys_with_prefix(self.namespace.prefix())?;
        let mut removed = 0;
        for key in keys {
            if self.store.remove_item(&key, self.tab_id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(key: &str, value: &str) -> StoredRecord {
        StoredRecord::new(key, value, "test-agent", false)
    }

    #[test]
    fn test_open_creates_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested").join("data");
        let store = LocalStore::open(&dir, DEFAULT_QUOTA_BYTES).unwrap();
        assert!(dir.exists());
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_persists_to_disk() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::open(temp.path(), DEFAULT_QUOTA_BYTES).unwrap();
        store.set_item("shoplist:a", "1", Uuid::nil()).unwrap();

        let reopened = LocalStore::open(temp.path(), DEFAULT_QUOTA_BYTES).unwrap();
        assert_eq!(reopened.get_item("shoplist:a").unwrap(), Some("1".to_string()));
    }

    #[test]
    fn test_corrupt_file_is_treated_as_empty() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(LOCAL_STORE_FILE), "{not json").unwrap();
        let store = LocalStore::open(temp.path(), DEFAULT_QUOTA_BYTES).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_quota_exceeded() {
        let store = LocalStore::in_memory(16);
        store.set_item("k1", "12345", Uuid::nil()).unwrap();
        let err = store.set_item("k2", "1234567890", Uuid::nil()).unwrap_err();
        assert!(matches!(err, BackendError::QuotaExceeded { .. }));
        // Overwriting an existing key only counts the difference.
        store.set_item("k1", "1234567890", Uuid::nil()).unwrap();
    }

    #[test]
    fn test_unavailable_store_errors() {
        let store = LocalStore::in_memory(DEFAULT_QUOTA_BYTES);
        store.set_available(false);
        assert!(matches!(
            store.get_item("k"),
            Err(BackendError::Unavailable(BackendKind::Durable))
        ));
        assert!(store.set_item("k", "v", Uuid::nil()).is_err());
    }

    #[test]
    fn test_events_broadcast_with_source() {
        let store = LocalStore::in_memory(DEFAULT_QUOTA_BYTES);
        let mut rx = store.subscribe();
        let tab = Uuid::new_v4();
        store.set_item("shoplist:x", "v", tab).unwrap();
        store.remove_item("shoplist:x", tab).unwrap();

        let set = rx.try_recv().unwrap();
        assert_eq!(set.key, "shoplist:x");
        assert_eq!(set.new_value, Some("v".to_string()));
        assert_eq!(set.source, tab);

        let removed = rx.try_recv().unwrap();
        assert_eq!(removed.new_value, None);
    }

    #[test]
    fn test_evict_all() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::open(temp.path(), DEFAULT_QUOTA_BYTES).unwrap();
        store.set_item("shoplist:a", "1", Uuid::nil()).unwrap();
        store.set_item("shoplist.backup:a", "1", Uuid::nil()).unwrap();
        assert_eq!(store.evict_all().unwrap(), 2);
        assert!(store.is_empty());
        let reopened = LocalStore::open(temp.path(), DEFAULT_QUOTA_BYTES).unwrap();
        assert!(reopened.is_empty());
    }

    #[test]
    fn test_refresh_from_disk_reports_external_changes() {
        let temp = TempDir::new().unwrap();
        let ours = LocalStore::open(temp.path(), DEFAULT_QUOTA_BYTES).unwrap();
        ours.set_item("shoplist:keep", "1", Uuid::nil()).unwrap();
        ours.set_item("shoplist:gone", "1", Uuid::nil()).unwrap();

        // Another process writes the same file.
        let theirs = LocalStore::open(temp.path(), DEFAULT_QUOTA_BYTES).unwrap();
        theirs.set_item("shoplist:new", "2", Uuid::nil()).unwrap();
        theirs.remove_item("shoplist:gone", Uuid::nil()).unwrap();
        theirs.set_item("shoplist.backup:new", "2", Uuid::nil()).unwrap();

        let changed = ours.refresh_from_disk().unwrap();
        assert_eq!(changed, vec!["shoplist:gone".to_string(), "shoplist:new".to_string()]);
        assert_eq!(ours.get_item("shoplist:new").unwrap(), Some("2".to_string()));
        assert!(ours.refresh_from_disk().unwrap().is_empty());
    }

    #[test]
    fn test_writes_keep_other_process_keys() {
        let temp = TempDir::new().unwrap();
        let a = LocalStore::open(temp.path(), DEFAULT_QUOTA_BYTES).unwrap();
        let b = LocalStore::open(temp.path(), DEFAULT_QUOTA_BYTES).unwrap();

        b.set_item("shoplist:user_name", "Alice", Uuid::nil()).unwrap();
        a.set_item("shoplist:app_theme", "dark", Uuid::nil()).unwrap();
        b.remove_item("shoplist:missing", Uuid::nil()).unwrap();

        let reopened = LocalStore::open(temp.path(), DEFAULT_QUOTA_BYTES).unwrap();
        assert_eq!(
            reopened.get_item("shoplist:user_name").unwrap(),
            Some("Alice".to_string())
        );
        assert_eq!(
            reopened.get_item("shoplist:app_theme").unwrap(),
            Some("dark".to_string())
        );

        // The write merged B's key in; the next refresh still reports it.
        assert_eq!(
            a.refresh_from_disk().unwrap(),
            vec!["shoplist:user_name".to_string()]
        );
        assert!(a.refresh_from_disk().unwrap().is_empty());
    }

    #[test]
    fn test_failed_persist_leaves_memory_unchanged() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("data");
        let store = LocalStore::open(&dir, DEFAULT_QUOTA_BYTES).unwrap();
        store.set_item("shoplist:a", "1", Uuid::nil()).unwrap();

        fs::remove_dir_all(&dir).unwrap();
        assert!(store.set_item("shoplist:b", "2", Uuid::nil()).is_err());
        assert_eq!(store.get_item("shoplist:b").unwrap(), None);
        assert_eq!(store.get_item("shoplist:a").unwrap(), Some("1".to_string()));
    }

    #[test]
    fn test_corrupt_file_does_not_drop_memory_on_write() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::open(temp.path(), DEFAULT_QUOTA_BYTES).unwrap();
        store.set_item("shoplist:a", "1", Uuid::nil()).unwrap();

        fs::write(temp.path().join(LOCAL_STORE_FILE), "{not json").unwrap();
        store.set_item("shoplist:b", "2", Uuid::nil()).unwrap();

        let reopened = LocalStore::open(temp.path(), DEFAULT_QUOTA_BYTES).unwrap();
        assert_eq!(reopened.len(), 2);
    }

    #[tokio::test]
    async fn test_backend_namespaces_are_separate() {
        let store = Arc::new(LocalStore::in_memory(DEFAULT_QUOTA_BYTES));
        let primary = DurableBackend::new(store.clone(), Namespace::Primary, Uuid::new_v4());
        let backup = DurableBackend::new(store.clone(), Namespace::Backup, Uuid::new_v4());

        primary.set(&record("lists", "P"), WriteOptions::default()).await.unwrap();
        assert_eq!(primary.get("lists").await.unwrap(), Some("P".to_string()));
        assert_eq!(backup.get("lists").await.unwrap(), None);

        backup.set(&record("lists", "B"), WriteOptions::default()).await.unwrap();
        assert_eq!(backup.keys().await.unwrap(), vec!["lists".to_string()]);
        assert_eq!(primary.clear().await.unwrap(), 1);
        assert_eq!(backup.get("lists").await.unwrap(), Some("B".to_string()));
    }

    #[tokio::test]
    async fn test_backend_stores_envelope() {
        let store = Arc::new(LocalStore::in_memory(DEFAULT_QUOTA_BYTES));
        let primary = DurableBackend::new(store.clone(), Namespace::Primary, Uuid::new_v4());
        primary.set(&record("theme", "ENC"), WriteOptions::default()).await.unwrap();

        let raw = store.get_item("shoplist:theme").unwrap().unwrap();
        let envelope: Envelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(envelope.value, "ENC");
        assert_eq!(envelope.user_agent, "test-agent");
    }

    #[tokio::test]
    async fn test_probe() {
        let store = Arc::new(LocalStore::in_memory(DEFAULT_QUOTA_BYTES));
        let primary = DurableBackend::new(store.clone(), Namespace::Primary, Uuid::new_v4());
        assert!(primary.probe().await);
        assert!(store.is_empty());

        store.set_available(false);
        assert!(!primary.probe().await);
    }
}
