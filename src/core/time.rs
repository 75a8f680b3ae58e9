//! Timestamp and envelope helpers for generated evidence.

use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use ulid::Ulid;

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}

/// Format an instant as whole-second RFC 3339 UTC (`2026-01-31T08:15:00Z`).
pub fn format_utc(instant: OffsetDateTime) -> Option<String> {
    let utc = instant.to_offset(time::UtcOffset::UTC);
    let utc = utc.replace_nanosecond(0).unwrap_or(utc);
    utc.format(&Rfc3339).ok()
}

/// Current time as RFC 3339 UTC; falls back to epoch seconds if formatting fails.
pub fn iso_utc_now() -> String {
    format_utc(OffsetDateTime::now_utc()).unwrap_or_else(now_epoch_z)
}

/// True when `value` parses as an RFC 3339 timestamp.
pub fn is_rfc3339(value: &str) -> bool {
    OffsetDateTime::parse(value, &Rfc3339).is_ok()
}

/// Compact trace id stem derived from a timestamp: `trc_20260131_081500`.
pub fn trace_id_stem(ts: &str) -> String {
    let digits: String = ts
        .chars()
        .filter(|c| !matches!(c, '-' | ':' | 'Z'))
        .map(|c| if c == 'T' { '_' } else { c })
        .collect();
    format!("trc_{}", digits)
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Standard response envelope for `--format json`.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "envelope_version": "1.0.0",
        "ts": iso_utc_now(),
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
