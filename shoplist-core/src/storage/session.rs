//! Session-scoped keyed store, the native stand-in for `sessionStorage`.
//!
//! Lives as long as the facade that owns it and is never shared between tabs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::backend::{BackendError, BackendKind, StorageBackend, WriteOptions, WriteOutcome, PROBE_KEY};
use super::record::{Envelope, StoredRecord};
use super::SESSION_PREFIX;

#[derive(Debug)]
pub struct SessionStore {
    entries: RwLock<HashMap<String, String>>,
    available: AtomicBool,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable(BackendKind::Session))
        }
    }

    fn physical(key: &str) -> String {
        format!("{}{}", SESSION_PREFIX, key)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> BackendError {
    BackendError::Other("session store lock poisoned".to_string())
}

#[async_trait]
impl StorageBackend for SessionStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Session
    }

    async fn probe(&self) -> bool {
        if self.check_available().is_err() {
            return false;
        }
        match self.entries.write() {
            Ok(mut entries) => {
                let key = Self::physical(PROBE_KEY);
                entries.insert(key.clone(), "1".to_string());
                entries.remove(&key);
                true
            }
            Err(_) => false,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.check_available()?;
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .get(&Self::physical(key))
            .map(|raw| Envelope::unwrap_raw(raw)))
    }

    async fn set(
        &self,
        record: &StoredRecord,
        _options: WriteOptions,
    ) -> Result<WriteOutcome, BackendError> {
        self.check_available()?;
        let raw = record.envelope().to_json()?;
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(Self::physical(&record.key), raw);
        Ok(WriteOutcome::Written)
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.check_available()?;
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.remove(&Self::physical(key));
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, BackendError> {
        self.check_available()?;
        let entries = self.entries.read().map_err(poisoned)?;
        let mut keys: Vec<String> = entries
            .keys()
            .filter_map(|k| k.strip_prefix(SESSION_PREFIX).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self) -> Result<usize, BackendError> {
        self.check_available()?;
        let mut entries = self.entries.write().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(SESSION_PREFIX));
        Ok(before - entries.len())
    }
}
