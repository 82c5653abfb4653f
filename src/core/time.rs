//! Shared timestamp/event helpers for journal entries and command envelopes.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use ulid::Ulid;

use crate::core::error::VaultError;

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Parses either a full RFC 3339 timestamp or a bare `YYYY-MM-DD` day
/// (interpreted as midnight UTC).
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, VaultError> {
    let input = input.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| VaultError::ValidationError(format!("Invalid timestamp: {}", input)))
}

/// Standard command response envelope shape used across CLI surfaces.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "envelope_version": "1.0.0",
        "ts": now().to_rfc3339(),
        "event_id": new_event_id(),
        "cmd": cmd,
        "status": status
    });
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}
