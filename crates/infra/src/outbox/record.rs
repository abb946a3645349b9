use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use mrp_core::{EventId, OutboxId};
use mrp_events::EventEnvelope;

/// Delivery state of an outbox row.
///
/// ```text
/// READY ──▶ PUBLISHED
///   │
///   └────▶ FAILED ──▶ PUBLISHED
///             │  ▲
///             └──┘ (retry)
///             └────▶ DEAD
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Ready,
    Published,
    Failed,
    Dead,
}

impl OutboxStatus {
    pub const ALL: [OutboxStatus; 4] = [
        OutboxStatus::Ready,
        OutboxStatus::Published,
        OutboxStatus::Failed,
        OutboxStatus::Dead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Ready => "READY",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
            OutboxStatus::Dead => "DEAD",
        }
    }

    /// PUBLISHED and DEAD are never revisited by the publisher.
    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Published | OutboxStatus::Dead)
    }
}

impl core::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "READY" => Ok(OutboxStatus::Ready),
            "PUBLISHED" => Ok(OutboxStatus::Published),
            "FAILED" => Ok(OutboxStatus::Failed),
            "DEAD" => Ok(OutboxStatus::Dead),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

/// One row of the outbox.
///
/// `payload` holds the serialized [`EventEnvelope`]; the other identity columns are
/// denormalized from it for querying.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxRecord {
    pub id: OutboxId,
    pub event_id: EventId,
    pub aggregate_id: String,
    pub event_type: String,
    pub version: i64,
    pub payload: JsonValue,
    pub status: OutboxStatus,
    pub occurred_at: DateTime<Utc>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub last_tried_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// A fresh READY row for a just-inserted record.
    pub fn ready(id: OutboxId, new: NewOutboxRecord) -> Self {
        Self {
            id,
            event_id: new.event_id,
            aggregate_id: new.aggregate_id,
            event_type: new.event_type,
            version: new.version,
            payload: new.payload,
            status: OutboxStatus::Ready,
            occurred_at: new.occurred_at,
            retry_count: 0,
            last_error: None,
            last_tried_at: None,
            next_retry_at: None,
            published_at: None,
        }
    }

    /// Whether the claim query would select this row at `now`.
    pub fn is_due(&self, max_retries: u32, now: DateTime<Utc>) -> bool {
        matches!(self.status, OutboxStatus::Ready | OutboxStatus::Failed)
            && i64::from(self.retry_count) < i64::from(max_retries)
            && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Decode the stored payload into the transport shape.
    pub fn envelope(&self) -> Result<EventEnvelope, serde_json::Error> {
        EventEnvelope::deserialize(&self.payload)
    }

    /// Apply a delivery outcome to this row.
    pub fn apply(&mut self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Published { at } => {
                self.status = OutboxStatus::Published;
                self.published_at = Some(*at);
                self.last_tried_at = Some(*at);
                self.next_retry_at = None;
            }
            DeliveryOutcome::Failed {
                retry_count,
                error,
                tried_at,
                next_retry_at,
            } => {
                self.status = OutboxStatus::Failed;
                self.retry_count = *retry_count;
                self.last_error = Some(error.clone());
                self.last_tried_at = Some(*tried_at);
                self.next_retry_at = Some(*next_retry_at);
            }
            DeliveryOutcome::Dead {
                retry_count,
                error,
                tried_at,
            } => {
                self.status = OutboxStatus::Dead;
                self.retry_count = *retry_count;
                self.last_error = Some(error.clone());
                self.last_tried_at = Some(*tried_at);
                self.next_retry_at = None;
            }
        }
    }

    /// Reset a dead row for manual replay.
    pub fn requeue(&mut self) {
        self.status = OutboxStatus::Ready;
        self.retry_count = 0;
        self.last_error = None;
        self.last_tried_at = None;
        self.next_retry_at = None;
    }
}

/// Insert shape used by the enqueuer.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxRecord {
    pub event_id: EventId,
    pub aggregate_id: String,
    pub event_type: String,
    pub version: i64,
    pub payload: JsonValue,
    pub occurred_at: DateTime<Utc>,
}

impl NewOutboxRecord {
    /// Build the row for an envelope, keyed by `aggregate_id`.
    pub fn from_envelope(
        aggregate_id: impl Into<String>,
        envelope: &EventEnvelope,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: envelope.event_id(),
            aggregate_id: aggregate_id.into(),
            event_type: envelope.event_type().to_string(),
            version: envelope.version(),
            payload: serde_json::to_value(envelope)?,
            occurred_at: envelope.occurred_at(),
        })
    }
}

/// Result of one delivery attempt, as recorded on the row.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Published {
        at: DateTime<Utc>,
    },
    Failed {
        retry_count: i32,
        error: String,
        tried_at: DateTime<Utc>,
        next_retry_at: DateTime<Utc>,
    },
    Dead {
        retry_count: i32,
        error: String,
        tried_at: DateTime<Utc>,
    },
}

impl DeliveryOutcome {
    pub fn status(&self) -> OutboxStatus {
        match self {
            DeliveryOutcome::Published { .. } => OutboxStatus::Published,
            DeliveryOutcome::Failed { .. } => OutboxStatus::Failed,
            DeliveryOutcome::Dead { .. } => OutboxStatus::Dead,
        }
    }
}

/// Cap an error message at `max_chars` characters (never splits a code point).
pub fn truncate_error(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => message[..byte_idx].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> OutboxRecord {
        let env = EventEnvelope::new(EventId::new(), "PartCreated", 1, Utc::now(), json!({"partId": 42}));
        OutboxRecord::ready(
            OutboxId::new(1),
            NewOutboxRecord::from_envelope("42", &env).unwrap(),
        )
    }

    #[test]
    fn status_round_trips_through_its_column_text() {
        for status in OutboxStatus::ALL {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
        assert!("SENT".parse::<OutboxStatus>().is_err());
    }

    #[test]
    fn ready_row_is_due_and_decodes() {
        let r = record();
        assert!(r.is_due(10, Utc::now()));
        let env = r.envelope().unwrap();
        assert_eq!(env.event_id(), r.event_id);
        assert_eq!(env.event_type(), "PartCreated");
    }

    #[test]
    fn failed_row_waits_for_next_retry_at() {
        let mut r = record();
        let now = Utc::now();
        r.apply(&DeliveryOutcome::Failed {
            retry_count: 1,
            error: "broker down".into(),
            tried_at: now,
            next_retry_at: now + chrono::Duration::seconds(5),
        });
        assert!(!r.is_due(10, now));
        assert!(r.is_due(10, now + chrono::Duration::seconds(5)));
        assert!(!r.is_due(1, now + chrono::Duration::seconds(5)));
    }

    #[test]
    fn terminal_rows_are_never_due() {
        let now = Utc::now();
        let mut published = record();
        published.apply(&DeliveryOutcome::Published { at: now });
        assert!(published.status.is_terminal());
        assert!(!published.is_due(10, now));

        let mut dead = record();
        dead.apply(&DeliveryOutcome::Dead {
            retry_count: 10,
            error: "x".into(),
            tried_at: now,
        });
        assert!(!dead.is_due(100, now));

        dead.requeue();
        assert_eq!(dead.status, OutboxStatus::Ready);
        assert_eq!(dead.retry_count, 0);
        assert!(dead.is_due(10, now));
    }

    #[test]
    fn requeue_clears_all_retry_bookkeeping() {
        let now = Utc::now();
        let mut r = record();
        r.apply(&DeliveryOutcome::Dead {
            retry_count: 10,
            error: "broker down".into(),
            tried_at: now,
        });
        assert_eq!(r.last_tried_at, Some(now));

        r.requeue();
        assert_eq!(r.status, OutboxStatus::Ready);
        assert_eq!(r.retry_count, 0);
        assert_eq!(r.last_error, None);
        assert_eq!(r.last_tried_at, None);
        assert_eq!(r.next_retry_at, None);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_error("héllo", 2), "hé");
        assert_eq!(truncate_error("short", 2000), "short");
        assert_eq!(truncate_error(&"x".repeat(3000), 2000).len(), 2000);
    }
}
