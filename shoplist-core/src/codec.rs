//! Obfuscation codec applied to every value before it leaves the storage facade.
//!
//! Encoding: `base64(xor(passphrase, "<epoch-ms>|<json>"))`.
//!
//! The passphrase only keeps stored data from being readable at a glance. It is
//! not encryption and offers no protection against anyone who can read this
//! source file.
//!
//! Decoding is total: legacy plain-JSON payloads are accepted as-is and any
//! malformed input yields `None` instead of an error.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use serde_json::Value;

/// Repeating XOR key.
const PASSPHRASE: &[u8] = b"shoplist::local-obfuscation::v2";

/// Separator between the embedded timestamp and the JSON payload.
const SEPARATOR: char = '|';

/// Format version written alongside encoded records.
pub const FORMAT_VERSION: &str = "2.0";

/// Encodes a JSON value.
///
/// Deterministic apart from the embedded timestamp.
pub fn encode(value: &Value) -> String {
    encode_at(value, Utc::now().timestamp_millis())
}

/// Encodes a JSON value with an explicit timestamp.
pub fn encode_at(value: &Value, timestamp_ms: i64) -> String {
    let payload = format!("{}{}{}", timestamp_ms, SEPARATOR, value);
    STANDARD.encode(xor(payload.as_bytes()))
}

/// Decodes text produced by [`encode`], or legacy plain JSON.
///
/// Never panics and never errors; anything unreadable is `None`.
pub fn decode(text: &str) -> Option<Value> {
    decode_with_timestamp(text).map(|(_, value)| value)
}

/// Decodes text and also returns the embedded timestamp when there is one.
///
/// Legacy plain-JSON input has no timestamp.
pub fn decode_with_timestamp(text: &str) -> Option<(Option<i64>, Value)> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if looks_like_plain_json(trimmed) {
        return serde_json::from_str(trimmed).ok().map(|v| (None, v));
    }

    if !is_base64(trimmed) {
        return serde_json::from_str(trimmed).ok().map(|v| (None, v));
    }

    match decode_payload(trimmed) {
        Some((ts, value)) => Some((Some(ts), value)),
        // Short legacy scalars such as `1234` also pass the alphabet check.
        None => serde_json::from_str(trimmed).ok().map(|v| (None, v)),
    }
}

fn decode_payload(text: &str) -> Option<(i64, Value)> {
    let bytes = STANDARD.decode(text).ok()?;
    let plain = String::from_utf8(xor(&bytes)).ok()?;
    let (ts, json) = plain.split_once(SEPARATOR)?;
    let ts = ts.parse::<i64>().ok()?;
    let value = serde_json::from_str(json).ok()?;
    Some((ts, value))
}

fn xor(input: &[u8]) -> Vec<u8> {
    input
        .iter()
        .zip(PASSPHRASE.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect()
}

fn looks_like_plain_json(text: &str) -> bool {
    matches!(text.as_bytes()[0], b'{' | b'[' | b'"')
        || matches!(text, "true" | "false" | "null")
}

/// Standard alphabet, `=` padding only at the end, length a multiple of four.
fn is_base64(text: &str) -> bool {
    if text.len() % 4 != 0 {
        return false;
    }
    let body = text.trim_end_matches('=');
    if text.len() - body.len() > 2 {
        return false;
    }
    body.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}
