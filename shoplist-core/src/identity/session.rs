//! Per-process session info and the host details it is built from.

use chrono::{DateTime, Local, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Facts about the host process that end up in session and activity records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostEnvironment {
    pub user_agent: String,
    pub platform: String,
    pub language: String,
    pub timezone: String,
    pub screen_resolution: Option<String>,
    pub url: Option<String>,
}

impl HostEnvironment {
    /// Reads the environment of the current process.
    pub fn detect() -> Self {
        let language = std::env::var("LC_ALL")
            .or_else(|_| std::env::var("LANG"))
            .ok()
            .and_then(|lang| normalize_language(&lang))
            .unwrap_or_else(|| "en-US".to_string());

        Self {
            user_agent: format!(
                "shoplist/{} ({}; {})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
            platform: std::env::consts::OS.to_string(),
            language,
            timezone: Local::now().offset().to_string(),
            screen_resolution: None,
            url: None,
        }
    }

    /// Fixed values for tests.
    pub fn fixed(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            platform: "test".to_string(),
            language: "en-US".to_string(),
            timezone: "+00:00".to_string(),
            screen_resolution: None,
            url: None,
        }
    }
}

/// `nl_NL.UTF-8` -> `nl-NL`; `C` and `POSIX` have no language.
fn normalize_language(raw: &str) -> Option<String> {
    let base = raw.split(['.', '@']).next()?.trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }
    Some(base.replace('_', "-"))
}

/// Ephemeral session, regenerated on every process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub user_agent: String,
    pub platform: String,
    pub language: String,
    pub timezone: String,
    pub screen_resolution: Option<String>,
    pub last_activity: DateTime<Utc>,
}

impl SessionInfo {
    pub fn start(env: &HostEnvironment) -> Self {
        let now = Utc::now();
        Self {
            session_id: generate_id("session"),
            start_time: now,
            user_agent: env.user_agent.clone(),
            platform: env.platform.clone(),
            language: env.language.clone(),
            timezone: env.timezone.clone(),
            screen_resolution: env.screen_resolution.clone(),
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// One entry of the capped activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub activity: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub user_agent: String,
}

/// `<prefix>_<epoch-ms>_<9 random base-36 chars>`.
pub fn generate_id(prefix: &str) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), suffix)
}
