//! The self-describing record persisted by the facade.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::codec::FORMAT_VERSION;

/// Metadata stamped on every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub format_version: String,
    pub origin_agent: String,
    pub is_persistent: bool,
}

/// A codec-encoded value plus its metadata, keyed by logical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: String,
    pub encoded_value: String,
    pub metadata: RecordMetadata,
}

impl StoredRecord {
    pub fn new(
        key: impl Into<String>,
        encoded_value: impl Into<String>,
        origin_agent: impl Into<String>,
        is_persistent: bool,
    ) -> Self {
        Self {
            key: key.into(),
            encoded_value: encoded_value.into(),
            metadata: RecordMetadata {
                timestamp: Utc::now().timestamp_millis(),
                format_version: FORMAT_VERSION.to_string(),
                origin_agent: origin_agent.into(),
                is_persistent,
            },
        }
    }

    /// The envelope written to the keyed stores.
    pub fn envelope(&self) -> Envelope {
        Envelope {
            value: self.encoded_value.clone(),
            timestamp: self.metadata.timestamp,
            version: self.metadata.format_version.clone(),
            user_agent: self.metadata.origin_agent.clone(),
            is_persistent: self.metadata.is_persistent,
        }
    }
}

/// JSON envelope stored by the durable and session tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub value: String,
    pub timestamp: i64,
    pub version: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub is_persistent: bool,
}

impl Envelope {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Extracts the encoded value from a raw keyed-store entry.
    ///
    /// Entries written before the envelope existed hold the encoded value
    /// directly; those are returned unchanged.
    pub fn unwrap_raw(raw: &str) -> String {
        match serde_json::from_str::<Envelope>(raw) {
            Ok(envelope) => envelope.value,
            Err(_) => raw.to_string(),
        }
    }
}
