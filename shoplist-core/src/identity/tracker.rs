use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

use super::session::{generate_id, ActivityEntry, HostEnvironment, SessionInfo};
use super::validation::{validate_user_name, ValidationError};
use crate::lifecycle::LifecycleListener;
use crate::storage::{keys, logical_key, Storage, WriteOptions};

/// Oldest entries are dropped once the log reaches this size.
pub const ACTIVITY_LOG_CAP: usize = 100;

/// Activity entries included in an export.
pub const EXPORT_ACTIVITY_ENTRIES: usize = 10;

pub const EXPORT_VERSION: &str = "1.0";

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

const IDENTITY_KEYS: [&str; 4] = [
    keys::USER_ID,
    keys::USER_NAME,
    keys::USER_PREFERENCES,
    keys::USER_ACTIVITY,
];

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Malformed user data: {0}")]
    MalformedExport(#[from] serde_json::Error),
}

/// Read-only composite returned by [`UserTracker::get_user_info`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub name: Option<String>,
    pub id: String,
    pub has_name: bool,
    pub preferences: Map<String, Value>,
    pub session: SessionInfo,
    pub is_active: bool,
}

/// Portable identity snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDataExport {
    pub user_id: String,
    pub user_name: Option<String>,
    pub preferences: Map<String, Value>,
    pub activity_log: Vec<ActivityEntry>,
    pub exported_at: DateTime<Utc>,
    pub version: String,
}

/// The parts of an export that an import applies.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDataImport {
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    preferences: Option<Map<String, Value>>,
}

#[derive(Debug, Default)]
struct Identity {
    id: Option<String>,
    name: Option<String>,
    preferences: Map<String, Value>,
    activity: VecDeque<ActivityEntry>,
}

/// Anonymous user identity, display name, preferences and activity log.
///
/// Independent of the state manager, so a state reset leaves the id intact.
pub struct UserTracker {
    storage: Arc<Storage>,
    env: HostEnvironment,
    session: Mutex<SessionInfo>,
    identity: Mutex<Identity>,
    id_gate: tokio::sync::Mutex<()>,
    flush_interval: Duration,
    last_flush: Mutex<Instant>,
}

impl UserTracker {
    pub fn new(storage: Arc<Storage>, env: HostEnvironment) -> Self {
        let session = SessionInfo::start(&env);
        Self {
            storage,
            env,
            session: Mutex::new(session),
            identity: Mutex::new(Identity::default()),
            id_gate: tokio::sync::Mutex::new(()),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            last_flush: Mutex::new(Instant::now()),
        }
    }

    /// Interval ticks flush at most once per `interval`.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Loads the stored identity, creating the id on first run, and logs the
    /// start of this session.
    pub async fn init(&self) -> String {
        let name = self.load_name().await;
        let preferences = self.load_preferences().await;
        let activity = self.load_activity().await;

        if let Ok(mut identity) = self.identity.lock() {
            identity.name = name;
            identity.preferences = preferences;
            identity.activity = activity;
        }

        let id = self.get_user_id().await;
        let session = self.session();
        self.log_activity(
            "session_start",
            json!({ "sessionId": session.session_id, "platform": session.platform }),
        )
        .await;

        tracing::debug!("User tracker initialized for {}", id);
        id
    }

    /// Returns the user id, creating and persisting one if none exists yet.
    pub async fn get_user_id(&self) -> String {
        if let Some(id) = self.cached_id() {
            return id;
        }

        // Serialize first-time creation so concurrent callers agree on one id.
        let _gate = self.id_gate.lock().await;
        if let Some(id) = self.cached_id() {
            return id;
        }

        let id = match self.storage.get_item(keys::USER_ID).await {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => {
                let id = generate_id("user");
                let report = self
                    .storage
                    .set_item(keys::USER_ID, json!(id), WriteOptions::critical())
                    .await;
                if report.is_total_failure() {
                    tracing::warn!("User id {} is held in memory only", id);
                }
                tracing::info!("Created user id {}", id);
                id
            }
        };

        if let Ok(mut identity) = self.identity.lock() {
            identity.id = Some(id.clone());
        }
        id
    }

    /// Validates and stores a display name, then syncs all cached values.
    ///
    /// Returns the trimmed name that was stored.
    pub async fn set_user_name(&self, name: &str) -> Result<String, ValidationError> {
        let name = validate_user_name(name)?;

        if let Ok(mut identity) = self.identity.lock() {
            identity.name = Some(name.clone());
        }
        self.storage
            .set_item(keys::USER_NAME, json!(name), WriteOptions::critical())
            .await;
        self.log_activity("name_set", json!({ "name": name })).await;
        self.storage.sync_storage().await;

        Ok(name)
    }

    pub async fn clear_user_name(&self) {
        let had_name = self
            .identity
            .lock()
            .map(|mut identity| identity.name.take().is_some())
            .unwrap_or(false);

        self.storage.remove_item(keys::USER_NAME).await;
        if had_name {
            self.log_activity("name_cleared", Value::Null).await;
        }
    }

    pub fn get_user_name(&self) -> Option<String> {
        self.identity.lock().ok()?.name.clone()
    }

    pub async fn get_user_info(&self) -> UserInfo {
        let id = self.get_user_id().await;
        let name = self.get_user_name();
        UserInfo {
            has_name: name.is_some(),
            name,
            id,
            preferences: self.preferences(),
            session: self.session(),
            is_active: true,
        }
    }

    pub fn session(&self) -> SessionInfo {
        match self.session.lock() {
            Ok(session) => session.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Sets one preference and stamps `lastUpdated`.
    pub async fn set_preference(&self, key: &str, value: Value) {
        let preferences = match self.identity.lock() {
            Ok(mut identity) => {
                identity.preferences.insert(key.to_string(), value);
                identity
                    .preferences
                    .insert("lastUpdated".to_string(), json!(Utc::now()));
                identity.preferences.clone()
            }
            Err(_) => return,
        };

        self.storage
            .set_item(
                keys::USER_PREFERENCES,
                Value::Object(preferences),
                WriteOptions::default(),
            )
            .await;
        self.log_activity("preference_set", json!({ "key": key })).await;
    }

    pub fn get_preference(&self, key: &str) -> Option<Value> {
        self.identity.lock().ok()?.preferences.get(key).cloned()
    }

    pub fn preferences(&self) -> Map<String, Value> {
        self.identity
            .lock()
            .map(|identity| identity.preferences.clone())
            .unwrap_or_default()
    }

    /// Appends to the activity log, dropping the oldest entries past the cap.
    ///
    /// A failed write is logged; the entry stays in memory either way.
    pub async fn log_activity(&self, activity: &str, data: Value) {
        let session_id = match self.session.lock() {
            Ok(mut session) => {
                session.touch();
                session.session_id.clone()
            }
            Err(_) => String::new(),
        };
        let entry = ActivityEntry {
            timestamp: Utc::now(),
            session_id,
            activity: activity.to_string(),
            data,
            url: self.env.url.clone(),
            user_agent: self.env.user_agent.clone(),
        };

        let log = match self.identity.lock() {
            Ok(mut identity) => {
                identity.activity.push_back(entry);
                while identity.activity.len() > ACTIVITY_LOG_CAP {
                    identity.activity.pop_front();
                }
                identity.activity.iter().cloned().collect::<Vec<_>>()
            }
            Err(_) => return,
        };

        if let Err(e) = self
            .storage
            .set_json(keys::USER_ACTIVITY, &log, WriteOptions::default())
            .await
        {
            tracing::warn!("Failed to persist activity log: {}", e);
        }
    }

    /// Activity entries, oldest first.
    pub fn activity_log(&self) -> Vec<ActivityEntry> {
        self.identity
            .lock()
            .map(|identity| identity.activity.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn export_user_data(&self) -> UserDataExport {
        let user_id = self.get_user_id().await;
        let log = self.activity_log();
        let skip = log.len().saturating_sub(EXPORT_ACTIVITY_ENTRIES);

        UserDataExport {
            user_id,
            user_name: self.get_user_name(),
            preferences: self.preferences(),
            activity_log: log.into_iter().skip(skip).collect(),
            exported_at: Utc::now(),
            version: EXPORT_VERSION.to_string(),
        }
    }

    /// Applies the name and preferences of an export. Returns `false` if the
    /// data is malformed or the name is rejected.
    pub async fn import_user_data(&self, backup: &Value) -> bool {
        match self.apply_import(backup).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("User data import failed: {}", e);
                false
            }
        }
    }

    async fn apply_import(&self, backup: &Value) -> Result<(), IdentityError> {
        let import: UserDataImport = serde_json::from_value(backup.clone())?;

        if let Some(name) = import.user_name.as_deref() {
            self.set_user_name(name).await?;
        }
        if let Some(preferences) = import.preferences {
            let merged = match self.identity.lock() {
                Ok(mut identity) => {
                    identity.preferences.extend(preferences);
                    Some(identity.preferences.clone())
                }
                Err(_) => None,
            };
            if let Some(merged) = merged {
                self.storage
                    .set_item(
                        keys::USER_PREFERENCES,
                        Value::Object(merged),
                        WriteOptions::default(),
                    )
                    .await;
            }
        }

        self.log_activity("data_imported", Value::Null).await;
        Ok(())
    }

    /// Persists name, preferences and activity log.
    pub async fn flush(&self) {
        let (name, preferences, activity) = match self.identity.lock() {
            Ok(identity) => (
                identity.name.clone(),
                identity.preferences.clone(),
                identity.activity.iter().cloned().collect::<Vec<_>>(),
            ),
            Err(_) => return,
        };

        if let Some(name) = name {
            self.storage
                .set_item(keys::USER_NAME, json!(name), WriteOptions::critical())
                .await;
        }
        self.storage
            .set_item(
                keys::USER_PREFERENCES,
                Value::Object(preferences),
                WriteOptions::default(),
            )
            .await;
        if let Err(e) = self
            .storage
            .set_json(keys::USER_ACTIVITY, &activity, WriteOptions::default())
            .await
        {
            tracing::warn!("Failed to persist activity log: {}", e);
        }

        if let Ok(mut last) = self.last_flush.lock() {
            *last = Instant::now();
        }
        tracing::debug!("Flushed user data");
    }

    /// Logs the end of the session and flushes.
    pub async fn dispose(&self) {
        self.log_activity("session_end", Value::Null).await;
        self.flush().await;
    }

    /// Re-reads one identity key from storage after another tab changed it.
    pub async fn reload_key(&self, key: &str) {
        if !IDENTITY_KEYS.contains(&key) {
            return;
        }
        self.storage.invalidate(key);
        match key {
            keys::USER_ID => {
                let id = match self.storage.get_item(key).await {
                    Some(Value::String(id)) if !id.is_empty() => Some(id),
                    _ => None,
                };
                if let (Some(id), Ok(mut identity)) = (id, self.identity.lock()) {
                    identity.id = Some(id);
                }
            }
            keys::USER_NAME => {
                let name = self.load_name().await;
                if let Ok(mut identity) = self.identity.lock() {
                    identity.name = name;
                }
            }
            keys::USER_PREFERENCES => {
                let preferences = self.load_preferences().await;
                if let Ok(mut identity) = self.identity.lock() {
                    identity.preferences = preferences;
                }
            }
            keys::USER_ACTIVITY => {
                let activity = self.load_activity().await;
                if let Ok(mut identity) = self.identity.lock() {
                    identity.activity = activity;
                }
            }
            _ => {}
        }
        tracing::debug!("Reloaded {} after external change", key);
    }

    fn cached_id(&self) -> Option<String> {
        self.identity.lock().ok()?.id.clone()
    }

    async fn load_name(&self) -> Option<String> {
        match self.storage.get_item(keys::USER_NAME).await? {
            Value::String(name) if !name.is_empty() => Some(name),
            _ => None,
        }
    }

    async fn load_preferences(&self) -> Map<String, Value> {
        self.storage
            .get_json(keys::USER_PREFERENCES)
            .await
            .unwrap_or_default()
    }

    async fn load_activity(&self) -> VecDeque<ActivityEntry> {
        let mut log: VecDeque<ActivityEntry> = self
            .storage
            .get_json::<Vec<ActivityEntry>>(keys::USER_ACTIVITY)
            .await
            .unwrap_or_default()
            .into();
        while log.len() > ACTIVITY_LOG_CAP {
            log.pop_front();
        }
        log
    }

    fn flush_due(&self) -> bool {
        self.last_flush
            .lock()
            .map(|last| last.elapsed() >= self.flush_interval)
            .unwrap_or(true)
    }
}

#[async_trait]
impl LifecycleListener for UserTracker {
    async fn on_foreground(&self) {
        self.log_activity("app_foreground", Value::Null).await;
    }

    async fn on_background(&self) {
        self.flush().await;
    }

    async fn on_external_change(&self, physical_key: &str) {
        if let Some(key) = logical_key(physical_key) {
            self.reload_key(key).await;
        }
    }

    async fn on_interval_tick(&self) {
        if self.flush_due() {
            self.flush().await;
        }
    }

    async fn on_unload(&self) {
        self.dispose().await;
    }
}
