use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use mrp_core::EventId;

use crate::Event;

/// The transport-native shape of one event.
///
/// This is what the outbox stores as its payload, what the publisher sends, and what
/// projection synchronizers receive:
///
/// ```json
/// {"eventId": "…", "eventType": "PartUpdated", "version": 3,
///  "occurredAt": "2026-01-01T00:00:00Z", "payload": {"partId": 42, …}}
/// ```
///
/// - `event_id` is the duplicate-suppression key on the consuming side.
/// - `version` orders events of one aggregate; consumers discard anything not newer
///   than what they already applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    event_id: EventId,
    event_type: String,
    version: i64,
    occurred_at: DateTime<Utc>,
    payload: JsonValue,
}

impl EventEnvelope {
    pub fn new(
        event_id: EventId,
        event_type: impl Into<String>,
        version: i64,
        occurred_at: DateTime<Utc>,
        payload: JsonValue,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            version,
            occurred_at,
            payload,
        }
    }

    /// Wrap a typed event. Fails only if the event cannot be serialized.
    pub fn from_event<E: Event>(
        event_id: EventId,
        version: i64,
        occurred_at: DateTime<Utc>,
        event: &E,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id,
            event_type: event.event_type().to_string(),
            version,
            occurred_at,
            payload: serde_json::to_value(event)?,
        })
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// Decode the payload into a typed structure (unknown fields are ignored).
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Decode a single payload field.
    pub fn payload_field<T: DeserializeOwned>(&self, name: &str) -> Result<T, serde_json::Error> {
        match self.payload.get(name) {
            Some(value) => T::deserialize(value),
            None => Err(<serde_json::Error as serde::de::Error>::custom(format!(
                "missing field `{name}`"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope() -> EventEnvelope {
        EventEnvelope::new(
            EventId::new(),
            "PartCreated",
            1,
            Utc::now(),
            json!({"partId": 42, "name": "A"}),
        )
    }

    #[test]
    fn serializes_with_camel_case_wire_names() {
        let env = envelope();
        let wire = serde_json::to_value(&env).unwrap();
        assert_eq!(wire["eventType"], "PartCreated");
        assert_eq!(wire["version"], 1);
        assert!(wire["eventId"].is_string());
        assert!(wire["occurredAt"].is_string());
        assert_eq!(wire["payload"]["partId"], 42);

        let back: EventEnvelope = serde_json::from_value(wire).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn payload_field_reports_missing_fields() {
        let env = envelope();
        assert_eq!(env.payload_field::<i64>("partId").unwrap(), 42);
        let err = env.payload_field::<i64>("materialId").unwrap_err();
        assert!(err.to_string().contains("materialId"));
    }
}
