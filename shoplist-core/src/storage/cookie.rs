//! Cookie jar tier.
//!
//! Cookies are tiny, so this tier only receives critical writes and only the
//! raw encoded value, without the metadata envelope. Each cookie carries a
//! SHA-256 signature so a hand-edited jar reads as empty instead of as
//! garbage. Removal works the way it does in a browser: the cookie is
//! re-written with an expiry in the past.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::backend::{BackendError, BackendKind, StorageBackend, WriteOptions, WriteOutcome, PROBE_KEY};
use super::record::StoredRecord;
use super::PRIMARY_PREFIX;

/// File name of the cookie jar inside the data directory.
pub const COOKIE_JAR_FILE: &str = "cookies.json";

/// Per-cookie limit on name plus encoded value.
pub const DEFAULT_COOKIE_MAX_BYTES: usize = 4096;

const SIGNING_KEY: &str = "shoplist-cookie-signature";

/// Cookie lifetime in days.
const MAX_AGE_DAYS: i64 = 365;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// URL-encoded value.
    pub value: String,
    /// Epoch milliseconds.
    pub expires_at: i64,
    pub signature: String,
}

impl Cookie {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

fn sign(name: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(SIGNING_KEY.as_bytes());
    hasher.update(name.as_bytes());
    hasher.update(b"=");
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug)]
pub struct CookieJar {
    path: Option<PathBuf>,
    max_bytes: usize,
    cookies: RwLock<BTreeMap<String, Cookie>>,
}

impl CookieJar {
    pub fn open(data_dir: &Path, max_bytes: usize) -> Result<Self, BackendError> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(COOKIE_JAR_FILE);
        let cookies = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!("Ignoring corrupt cookie jar {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(BackendError::Io(e)),
        };

        Ok(Self {
            path: Some(path),
            max_bytes,
            cookies: RwLock::new(cookies),
        })
    }

    pub fn in_memory(max_bytes: usize) -> Self {
        Self {
            path: None,
            max_bytes,
            cookies: RwLock::new(BTreeMap::new()),
        }
    }

    /// Reads a cookie by full name. Expired or badly signed cookies are absent.
    pub fn get_cookie(&self, name: &str) -> Result<Option<String>, BackendError> {
        let cookies = self.cookies.read().map_err(poisoned)?;
        let Some(cookie) = cookies.get(name) else {
            return Ok(None);
        };
        if cookie.is_expired(Utc::now().timestamp_millis()) {
            return Ok(None);
        }
        if cookie.signature != sign(name, &cookie.value) {
            tracing::warn!("Cookie {} failed signature check", name);
            return Ok(None);
        }
        match urlencoding::decode(&cookie.value) {
            Ok(value) => Ok(Some(value.into_owned())),
            Err(e) => {
                tracing::warn!("Cookie {} is not valid UTF-8: {}", name, e);
                Ok(None)
            }
        }
    }

    pub fn set_cookie(&self, name: &str, value: &str) -> Result<(), BackendError> {
        let encoded = urlencoding::encode(value).into_owned();
        let size = name.len() + encoded.len();
        if size > self.max_bytes {
            return Err(BackendError::QuotaExceeded {
                kind: BackendKind::Cookie,
                needed: size,
                limit: self.max_bytes,
            });
        }

        let expires_at = (Utc::now() + Duration::days(MAX_AGE_DAYS)).timestamp_millis();
        let cookie = Cookie {
            signature: sign(name, &encoded),
            value: encoded,
            expires_at,
        };

        let mut cookies = self.cookies.write().map_err(poisoned)?;
        cookies.insert(name.to_string(), cookie);
        self.persist(&mut cookies)
    }

    /// Expires a cookie. Returns whether a live cookie existed.
    pub fn expire_cookie(&self, name: &str) -> Result<bool, BackendError> {
        let mut cookies = self.cookies.write().map_err(poisoned)?;
        let now = Utc::now().timestamp_millis();
        let existed = match cookies.get_mut(name) {
            Some(cookie) if !cookie.is_expired(now) => {
                cookie.value.clear();
                cookie.expires_at = 0;
                true
            }
            _ => false,
        };
        self.persist(&mut cookies)?;
        Ok(existed)
    }

    /// Names of live cookies.
    pub fn names(&self) -> Result<Vec<String>, BackendError> {
        let cookies = self.cookies.read().map_err(poisoned)?;
        let now = Utc::now().timestamp_millis();
        Ok(cookies
            .iter()
            .filter(|(_, c)| !c.is_expired(now))
            .map(|(name, _)| name.clone())
            .collect())
    }

    /// Drops expired cookies, then writes the jar.
    fn persist(&self, cookies: &mut BTreeMap<String, Cookie>) -> Result<(), BackendError> {
        let now = Utc::now().timestamp_millis();
        cookies.retain(|_, c| !c.is_expired(now));

        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(&*cookies)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    fn cookie_name(key: &str) -> String {
        format!("{}{}", PRIMARY_PREFIX, key)
    }
}

fn poisoned<T>(_: T) -> BackendError {
    BackendError::Other("cookie jar lock poisoned".to_string())
}

#[async_trait]
impl StorageBackend for CookieJar {
    fn kind(&self) -> BackendKind {
        BackendKind::Cookie
    }

    async fn probe(&self) -> bool {
        let name = Self::cookie_name(PROBE_KEY);
        let ok = self.set_cookie(&name, "1").is_ok() && self.expire_cookie(&name).is_ok();
        if !ok {
            tracing::warn!("cookie storage probe failed");
        }
        ok
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.get_cookie(&Self::cookie_name(key))
    }

    async fn set(
        &self,
        record: &StoredRecord,
        options: WriteOptions,
    ) -> Result<WriteOutcome, BackendError> {
        if !options.critical {
            return Ok(WriteOutcome::Skipped);
        }
        self.set_cookie(&Self::cookie_name(&record.key), &record.encoded_value)?;
        Ok(WriteOutcome::Written)
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.expire_cookie(&Self::cookie_name(key))?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, BackendError> {
        Ok(self
            .names()?
            .into_iter()
            .filter_map(|n| n.strip_prefix(PRIMARY_PREFIX).map(str::to_string))
            .collect())
    }

    async fn clear(&self) -> Result<usize, BackendError> {
        let mut removed = 0;
        for name in self.names()? {
            if name.starts_with(PRIMARY_PREFIX) && self.expire_cookie(&name)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
