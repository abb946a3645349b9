use chrono::{DateTime, Utc};

use mrp_core::EventId;
use mrp_events::{EventEnvelope, StreamPosition};

use super::ProjectionMapping;

/// One projected entity.
///
/// Immutable value: every accepted event produces a new record from the previous one
/// and it is persisted as a single write.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionRecord<M: ProjectionMapping> {
    pub id: M::Id,
    pub fields: M::Fields,
    /// Version of the last applied event (non-decreasing).
    pub version: i64,
    pub last_event_id: EventId,
    pub deleted: bool,
    /// Logical time of the last applied event on the producing side.
    pub source_updated_at: DateTime<Utc>,
    /// Local application time.
    pub updated_at: DateTime<Utc>,
}

impl<M: ProjectionMapping> ProjectionRecord<M> {
    pub fn created(
        id: M::Id,
        fields: M::Fields,
        envelope: &EventEnvelope,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            fields,
            version: envelope.version(),
            last_event_id: envelope.event_id(),
            deleted: false,
            source_updated_at: envelope.occurred_at(),
            updated_at: now,
        }
    }

    /// Wholesale replacement of the business fields. `recreate` also clears `deleted`.
    pub fn replaced(
        &self,
        fields: M::Fields,
        envelope: &EventEnvelope,
        recreate: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: self.id,
            fields,
            version: envelope.version(),
            last_event_id: envelope.event_id(),
            deleted: if recreate { false } else { self.deleted },
            source_updated_at: envelope.occurred_at(),
            updated_at: now,
        }
    }

    /// Soft delete: fields stay as they last stood.
    pub fn tombstoned(&self, envelope: &EventEnvelope, now: DateTime<Utc>) -> Self {
        Self {
            id: self.id,
            fields: self.fields.clone(),
            version: envelope.version(),
            last_event_id: envelope.event_id(),
            deleted: true,
            source_updated_at: envelope.occurred_at(),
            updated_at: now,
        }
    }

    pub fn position(&self) -> StreamPosition {
        StreamPosition {
            version: self.version,
            last_event_id: self.last_event_id,
        }
    }
}
