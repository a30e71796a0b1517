//! The storage facade: one key/value API over every available backend.
//!
//! Writes go to the memory cache synchronously and then to every available
//! backend concurrently; a failing backend is logged and reported but never
//! fails the call. Reads consult the memory cache first and then the backends
//! in fixed priority order, taking the first record the codec can decode.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use super::backend::{BackendError, BackendKind, StorageBackend, WriteOptions, WriteOutcome};
use super::cookie::CookieJar;
use super::document::DocumentStore;
use super::local::{DurableBackend, LocalStore, Namespace};
use super::record::StoredRecord;
use super::session::SessionStore;
use super::WELL_KNOWN_KEYS;
use crate::codec;
use crate::config::StorageConfig;

/// Write-through cache of decoded values. Authoritative when present.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryCache {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().ok()?.get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: Value) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.to_string(), value);
        }
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.write().ok()?.remove(key)
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<(String, Value)> {
        self.entries
            .read()
            .map(|e| e.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }
}

/// Result of one backend's part in a facade write or removal.
#[derive(Debug)]
pub struct BackendResult {
    pub kind: BackendKind,
    pub result: Result<WriteOutcome, BackendError>,
}

/// Per-backend outcome of a facade write or removal.
#[derive(Debug)]
pub struct WriteReport {
    pub key: String,
    pub results: Vec<BackendResult>,
}

impl WriteReport {
    /// Backends that accepted the write.
    pub fn written(&self) -> Vec<BackendKind> {
        self.results
            .iter()
            .filter(|r| matches!(r.result, Ok(WriteOutcome::Written)))
            .map(|r| r.kind)
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (BackendKind, &BackendError)> {
        self.results
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (r.kind, e)))
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// True when at least one backend was attempted and none accepted the
    /// write. The memory cache still holds the value.
    pub fn is_total_failure(&self) -> bool {
        self.has_failures() && self.written().is_empty()
    }
}

/// Read-only diagnostic snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageHealth {
    pub available: BTreeMap<BackendKind, bool>,
    pub memory_cache_size: usize,
    pub timestamp: DateTime<Utc>,
}

/// Builder for a facade over an explicit set of backends.
pub struct StorageBuilder {
    agent: String,
    local: Option<Arc<LocalStore>>,
    session: bool,
    documents: Option<DocumentStore>,
    cookies: Option<Arc<CookieJar>>,
    extra: Vec<Arc<dyn StorageBackend>>,
}

impl StorageBuilder {
    /// Shares a durable store; adds both the primary and backup namespaces.
    pub fn local_store(mut self, store: Arc<LocalStore>) -> Self {
        self.local = Some(store);
        self
    }

    pub fn without_session(mut self) -> Self {
        self.session = false;
        self
    }

    pub fn documents(mut self, store: DocumentStore) -> Self {
        self.documents = Some(store);
        self
    }

    pub fn cookies(mut self, jar: Arc<CookieJar>) -> Self {
        self.cookies = Some(jar);
        self
    }

    /// Appends a custom backend after the standard ones.
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.extra.push(backend);
        self
    }

    pub fn build(self) -> Storage {
        let tab_id = Uuid::new_v4();
        let mut backends: Vec<Arc<dyn StorageBackend>> = Vec::new();

        if let Some(local) = &self.local {
            backends.push(Arc::new(DurableBackend::new(
                local.clone(),
                Namespace::Primary,
                tab_id,
            )));
            backends.push(Arc::new(DurableBackend::new(
                local.clone(),
                Namespace::Backup,
                tab_id,
            )));
        }
        if self.session {
            backends.push(Arc::new(SessionStore::new()));
        }
        if let Some(documents) = self.documents {
            backends.push(Arc::new(documents));
        }
        if let Some(cookies) = self.cookies {
            backends.push(cookies);
        }
        backends.extend(self.extra);

        Storage {
            backends,
            cache: MemoryCache::default(),
            availability: RwLock::new(BTreeMap::new()),
            agent: self.agent,
            tab_id,
            local: self.local,
        }
    }
}

/// Redundant key/value storage facade.
pub struct Storage {
    backends: Vec<Arc<dyn StorageBackend>>,
    cache: MemoryCache,
    availability: RwLock<BTreeMap<BackendKind, bool>>,
    agent: String,
    tab_id: Uuid,
    local: Option<Arc<LocalStore>>,
}

impl Storage {
    pub fn builder(agent: impl Into<String>) -> StorageBuilder {
        StorageBuilder {
            agent: agent.into(),
            local: None,
            session: true,
            documents: None,
            cookies: None,
            extra: Vec::new(),
        }
    }

    /// A facade over exactly these backends, in this read order.
    pub fn with_backends(agent: impl Into<String>, backends: Vec<Arc<dyn StorageBackend>>) -> Self {
        Storage {
            backends,
            cache: MemoryCache::default(),
            availability: RwLock::new(BTreeMap::new()),
            agent: agent.into(),
            tab_id: Uuid::new_v4(),
            local: None,
        }
    }

    /// Opens the standard on-disk backends under `config.data_dir` and probes
    /// them. Only a failure to open the durable store is fatal; the document
    /// database and cookie jar are left out if they cannot be opened.
    pub async fn open(
        config: &StorageConfig,
        agent: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let local = Arc::new(LocalStore::open(&config.data_dir, config.quota_bytes)?);
        let mut builder = Storage::builder(agent).local_store(local);

        if config.enable_documents {
            match DocumentStore::open(&config.data_dir).await {
                Ok(store) => builder = builder.documents(store),
                Err(e) => tracing::warn!("Document storage unavailable: {}", e),
            }
        }
        if config.enable_cookies {
            match CookieJar::open(&config.data_dir, config.cookie_max_bytes) {
                Ok(jar) => builder = builder.cookies(Arc::new(jar)),
                Err(e) => tracing::warn!("Cookie storage unavailable: {}", e),
            }
        }

        let storage = builder.build();
        storage.probe_availability().await;
        Ok(storage)
    }

    /// Every standard backend, none of them touching the filesystem.
    pub async fn in_memory(agent: impl Into<String>) -> Self {
        let local = Arc::new(LocalStore::in_memory(
            super::local::DEFAULT_QUOTA_BYTES,
        ));
        Self::in_memory_sharing(agent, local).await
    }

    /// In-memory facade sharing a durable store with other facades, the way
    /// browser tabs share `localStorage`.
    pub async fn in_memory_sharing(agent: impl Into<String>, local: Arc<LocalStore>) -> Self {
        let mut builder = Storage::builder(agent).local_store(local).cookies(Arc::new(
            CookieJar::in_memory(super::cookie::DEFAULT_COOKIE_MAX_BYTES),
        ));
        match DocumentStore::in_memory().await {
            Ok(store) => builder = builder.documents(store),
            Err(e) => tracing::warn!("Document storage unavailable: {}", e),
        }
        let storage = builder.build();
        storage.probe_availability().await;
        storage
    }

    /// Identifies this facade in durable-store events.
    pub fn tab_id(&self) -> Uuid {
        self.tab_id
    }

    /// The shared durable store, if this facade has one.
    pub fn local_store(&self) -> Option<&Arc<LocalStore>> {
        self.local.as_ref()
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Tries each backend once and records which ones are usable.
    pub async fn probe_availability(&self) -> BTreeMap<BackendKind, bool> {
        let probes = self.backends.iter().map(|backend| async move {
            let ok = backend.probe().await;
            (backend.kind(), ok)
        });
        let results = join_all(probes).await;

        let mut map: BTreeMap<BackendKind, bool> = BackendKind::PERSISTENT
            .iter()
            .map(|kind| (*kind, false))
            .collect();
        for (kind, ok) in results {
            map.insert(kind, ok);
        }
        map.insert(BackendKind::Memory, true);

        tracing::debug!("Storage availability: {:?}", map);
        if let Ok(mut availability) = self.availability.write() {
            *availability = map.clone();
        }
        map
    }

    /// Backends not yet probed are assumed usable.
    fn is_available(&self, kind: BackendKind) -> bool {
        self.availability
            .read()
            .map(|a| a.get(&kind).copied().unwrap_or(true))
            .unwrap_or(true)
    }

    /// Stores a value in the cache and every available backend.
    ///
    /// Resolves once every attempted backend write has settled.
    pub async fn set_item(&self, key: &str, value: Value, options: WriteOptions) -> WriteReport {
        let encoded = codec::encode(&value);
        self.cache.insert(key, value);

        let record = StoredRecord::new(key, encoded, self.agent.clone(), options.critical);
        let writes = self.backends.iter().map(|backend| {
            let record = &record;
            async move {
                let kind = backend.kind();
                let result = if self.is_available(kind) {
                    backend.set(record, options).await
                } else {
                    Ok(WriteOutcome::Skipped)
                };
                BackendResult { kind, result }
            }
        });
        let results = join_all(writes).await;

        let report = WriteReport {
            key: key.to_string(),
            results,
        };
        for (kind, e) in report.failures() {
            tracing::warn!("Failed to write {} to {} storage: {}", key, kind, e);
        }
        report
    }

    /// Serializes and stores a typed value.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: WriteOptions,
    ) -> Result<WriteReport, serde_json::Error> {
        let value = serde_json::to_value(value)?;
        Ok(self.set_item(key, value, options).await)
    }

    /// Returns the value for a key, or `None` if no tier holds a decodable one.
    pub async fn get_item(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.cache.get(key) {
            return Some(value);
        }

        for backend in &self.backends {
            let kind = backend.kind();
            if !self.is_available(kind) {
                continue;
            }
            match backend.get(key).await {
                Ok(Some(text)) => match codec::decode(&text) {
                    Some(value) if !value.is_null() => {
                        tracing::debug!("Read {} from {} storage", key, kind);
                        self.cache.insert(key, value.clone());
                        return Some(value);
                    }
                    _ => tracing::debug!("Undecodable {} in {} storage", key, kind),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!("Failed to read {} from {} storage: {}", key, kind, e),
            }
        }
        None
    }

    /// Reads and deserializes a typed value. A shape mismatch reads as absent.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_item(key).await?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Stored {} has unexpected shape: {}", key, e);
                None
            }
        }
    }

    /// Removes a key from the cache and, best-effort, from every backend.
    pub async fn remove_item(&self, key: &str) -> WriteReport {
        self.cache.remove(key);

        let removals = self.backends.iter().map(|backend| async move {
            let kind = backend.kind();
            let result = if self.is_available(kind) {
                backend.remove(key).await.map(|_| WriteOutcome::Written)
            } else {
                Ok(WriteOutcome::Skipped)
            };
            BackendResult { kind, result }
        });
        let report = WriteReport {
            key: key.to_string(),
            results: join_all(removals).await,
        };
        for (kind, e) in report.failures() {
            tracing::warn!("Failed to remove {} from {} storage: {}", key, kind, e);
        }
        report
    }

    /// Drops a cached value so the next read goes to the backends.
    pub fn invalidate(&self, key: &str) {
        self.cache.remove(key);
    }

    /// Re-persists every cached value at critical durability.
    ///
    /// Returns the number of keys written.
    pub async fn sync_storage(&self) -> usize {
        let entries = self.cache.snapshot();
        let count = entries.len();
        for (key, value) in entries {
            self.set_item(&key, value, WriteOptions::critical()).await;
        }
        tracing::debug!("Synced {} cached keys to storage", count);
        count
    }

    pub fn storage_health(&self) -> StorageHealth {
        let mut available = self
            .availability
            .read()
            .map(|a| a.clone())
            .unwrap_or_default();
        available.insert(BackendKind::Memory, true);

        StorageHealth {
            available,
            memory_cache_size: self.cache.len(),
            timestamp: Utc::now(),
        }
    }

    /// Deletes the well-known keys and everything under this application's
    /// prefixes in every backend. Irreversible.
    ///
    /// Returns the number of physical records removed by the namespace sweep.
    pub async fn clear_corrupted_data(&self) -> usize {
        for key in WELL_KNOWN_KEYS {
            self.remove_item(key).await;
        }

        let mut removed = 0;
        for backend in &self.backends {
            match backend.clear().await {
                Ok(count) => removed += count,
                Err(e) => tracing::warn!("Failed to clear {} storage: {}", backend.kind(), e),
            }
        }
        self.cache.clear();

        tracing::info!("Cleared {} stored records", removed);
        removed
    }

    /// Number of entries in the memory cache.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Logical keys held by a given backend.
    pub async fn backend_keys(&self, kind: BackendKind) -> Vec<String> {
        for backend in &self.backends {
            if backend.kind() == kind {
                return backend.keys().await.unwrap_or_default();
            }
        }
        Vec::new()
    }
}
