//! Chat event records as delivered by the webhook.
//!
//! The webhook emits loosely-typed JSON, so records are validated from
//! `serde_json::Value` rather than deserialized directly. Serialization uses
//! the webhook's own key names so the persisted cache round-trips through the
//! same validation path.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

pub const SESSION_ID_KEY: &str = "Session ID";
pub const TIMESTAMP_KEY: &str = "Timestamp";
pub const APPOINTMENT_BOOKED_KEY: &str = "Appointment Booked";

const SESSION_ID_ALIAS: &str = "sessionId";
const TIMESTAMP_ALIAS: &str = "timestamp";
const APPOINTMENT_BOOKED_ALIAS: &str = "appointmentBooked";

/// One logged chat message / session touchpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    #[serde(rename = "Session ID")]
    pub session_id: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Appointment Booked")]
    pub appointment_booked: bool,
}

impl EventRecord {
    pub fn new(session_id: impl Into<String>, timestamp: impl Into<String>, booked: bool) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: timestamp.into(),
            appointment_booked: booked,
        }
    }

    /// Validate a raw webhook entry. Returns `None` when the session id or
    /// timestamp is missing or empty.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let session_id = field(obj, SESSION_ID_KEY, SESSION_ID_ALIAS).and_then(session_id_text)?;
        let timestamp = field(obj, TIMESTAMP_KEY, TIMESTAMP_ALIAS)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())?
            .to_string();
        // Only a literal `true` counts as a booking.
        let appointment_booked = matches!(
            field(obj, APPOINTMENT_BOOKED_KEY, APPOINTMENT_BOOKED_ALIAS),
            Some(Value::Bool(true))
        );

        Some(Self {
            session_id,
            timestamp,
            appointment_booked,
        })
    }

    /// Calendar day of the record, taken from the leading `YYYY-MM-DD` segment.
    pub fn day(&self) -> Option<NaiveDate> {
        let head = self.timestamp.get(..10)?;
        NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
    }
}

fn field<'a>(
    obj: &'a serde_json::Map<String, Value>,
    key: &str,
    alias: &str,
) -> Option<&'a Value> {
    obj.get(key).or_else(|| obj.get(alias))
}

fn session_id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

/// Normalise a webhook payload into valid records.
///
/// A bare (non-array) payload is treated as a one-element array; invalid
/// entries are dropped silently.
pub fn parse_payload(payload: Value) -> Vec<EventRecord> {
    let items = match payload {
        Value::Array(items) => items,
        other => {
            tracing::warn!("Webhook response is not an array, wrapping single value");
            vec![other]
        }
    };

    let total = items.len();
    let records: Vec<EventRecord> = items.iter().filter_map(EventRecord::from_value).collect();
    if records.len() < total {
        tracing::debug!(
            dropped = total - records.len(),
            kept = records.len(),
            "Dropped invalid webhook entries"
        );
    }
    records
}
