//! Outbox write path.
//!
//! Every function takes the caller's [`OutboxWriter`] (its open transaction) and
//! never commits. A serialization failure is returned as an error so the caller's
//! transaction aborts with it; nothing is recorded for a mutation that did not happen.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::debug;

use mrp_core::{EventId, OutboxId};
use mrp_events::{Event, EventEnvelope};

use super::{NewOutboxRecord, OutboxError, OutboxWriter};

/// Record one event with a caller-supplied version.
pub async fn enqueue<W>(
    writer: &mut W,
    aggregate_id: &str,
    event_type: &str,
    event_id: EventId,
    version: i64,
    payload: JsonValue,
    occurred_at: DateTime<Utc>,
) -> Result<OutboxId, OutboxError>
where
    W: OutboxWriter + ?Sized,
{
    let envelope = EventEnvelope::new(event_id, event_type, version, occurred_at, payload);
    insert_envelope(writer, aggregate_id, &envelope).await
}

/// Record a typed event with a caller-supplied version and a fresh event id.
pub async fn enqueue_event<W, E>(
    writer: &mut W,
    version: i64,
    event: &E,
) -> Result<EventId, OutboxError>
where
    W: OutboxWriter + ?Sized,
    E: Event,
{
    let event_id = EventId::new();
    let envelope = EventEnvelope::from_event(event_id, version, Utc::now(), event)?;
    insert_envelope(writer, &event.aggregate_id(), &envelope).await?;
    Ok(event_id)
}

/// Record a typed event with a centrally assigned version.
///
/// Takes the per-aggregate lock for the rest of the transaction, then assigns
/// `last recorded version + 1` (1 for a fresh aggregate). Concurrent mutations of one
/// aggregate serialize on the lock and never share a version.
pub async fn enqueue_next<W, E>(writer: &mut W, event: &E) -> Result<(EventId, i64), OutboxError>
where
    W: OutboxWriter + ?Sized,
    E: Event,
{
    let aggregate_id = event.aggregate_id();
    writer.lock_aggregate(&aggregate_id).await?;
    let version = writer.last_version(&aggregate_id).await?.unwrap_or(0) + 1;
    let event_id = enqueue_event(writer, version, event).await?;
    Ok((event_id, version))
}

async fn insert_envelope<W>(
    writer: &mut W,
    aggregate_id: &str,
    envelope: &EventEnvelope,
) -> Result<OutboxId, OutboxError>
where
    W: OutboxWriter + ?Sized,
{
    let record = NewOutboxRecord::from_envelope(aggregate_id, envelope)?;
    let id = writer.insert(record).await?;
    debug!(
        id = %id,
        event_id = %envelope.event_id(),
        aggregate_id = %aggregate_id,
        event_type = %envelope.event_type(),
        version = envelope.version(),
        "event enqueued"
    );
    Ok(id)
}
