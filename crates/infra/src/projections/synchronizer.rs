use std::marker::PhantomData;

use chrono::Utc;
use tracing::{debug, warn};

use mrp_events::{Decision, EventEnvelope, EventKind, SkipReason, SyncOutcome, decide};

use super::{ProjectionError, ProjectionMapping, ProjectionRecord, ProjectionStore};

/// Lost compare-and-set races tolerated per event before giving up.
const MAX_SAVE_ATTEMPTS: usize = 5;

/// Applies inbound envelopes of one entity family to its projection store.
///
/// Redelivered and out-of-order events are no-ops (see [`mrp_events::projection`]);
/// missing predecessors and unknown event types are logged and discarded. Only
/// undecodable payloads and storage failures are errors.
#[derive(Debug)]
pub struct ProjectionSynchronizer<M: ProjectionMapping, S> {
    store: S,
    _mapping: PhantomData<fn() -> M>,
}

impl<M, S> ProjectionSynchronizer<M, S>
where
    M: ProjectionMapping,
    S: ProjectionStore<M>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _mapping: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn apply(&self, envelope: &EventEnvelope) -> Result<SyncOutcome, ProjectionError> {
        let Some(kind) = EventKind::parse(M::ENTITY, envelope.event_type()) else {
            warn!(
                entity = M::ENTITY,
                event_id = %envelope.event_id(),
                event_type = %envelope.event_type(),
                "unknown event type; discarded"
            );
            return Ok(SyncOutcome::Skipped(SkipReason::UnknownEventType));
        };

        let id = M::id_of(envelope).map_err(|source| self.decode_error(envelope, source))?;

        for _ in 0..MAX_SAVE_ATTEMPTS {
            let current = self.store.find_by_id_including_deleted(id).await?;
            let decision = decide(
                current.as_ref().map(ProjectionRecord::position),
                envelope.event_id(),
                envelope.version(),
                Some(kind),
            );

            let now = Utc::now();
            let (next, expected, outcome) = match (decision, current) {
                (Decision::Insert, _) => {
                    let fields = self.fields(envelope)?;
                    (
                        ProjectionRecord::created(id, fields, envelope, now),
                        None,
                        SyncOutcome::Inserted,
                    )
                }
                (Decision::Replace { recreate }, Some(cur)) => {
                    let fields = self.fields(envelope)?;
                    (
                        cur.replaced(fields, envelope, recreate, now),
                        Some(cur.version),
                        SyncOutcome::Replaced,
                    )
                }
                (Decision::MarkDeleted, Some(cur)) => (
                    cur.tombstoned(envelope, now),
                    Some(cur.version),
                    SyncOutcome::Deleted,
                ),
                (Decision::Skip(reason), _) => {
                    self.log_skip(envelope, &id, reason);
                    return Ok(SyncOutcome::Skipped(reason));
                }
                // decide() only replaces or deletes an existing record.
                (Decision::Replace { .. } | Decision::MarkDeleted, None) => {
                    let reason = SkipReason::MissingPredecessor(kind);
                    self.log_skip(envelope, &id, reason);
                    return Ok(SyncOutcome::Skipped(reason));
                }
            };

            if self.store.save(&next, expected).await? {
                debug!(
                    entity = M::ENTITY,
                    id = %id,
                    event_id = %envelope.event_id(),
                    version = envelope.version(),
                    outcome = outcome.label(),
                    "projection updated"
                );
                return Ok(outcome);
            }

            debug!(
                entity = M::ENTITY,
                id = %id,
                event_id = %envelope.event_id(),
                "projection changed concurrently; re-evaluating"
            );
        }

        Err(ProjectionError::VersionConflict {
            entity: M::ENTITY,
            id: id.to_string(),
            attempts: MAX_SAVE_ATTEMPTS,
        })
    }

    fn fields(&self, envelope: &EventEnvelope) -> Result<M::Fields, ProjectionError> {
        M::fields_from(envelope).map_err(|source| self.decode_error(envelope, source))
    }

    fn decode_error(&self, envelope: &EventEnvelope, source: serde_json::Error) -> ProjectionError {
        ProjectionError::Decode {
            entity: M::ENTITY,
            event_id: envelope.event_id(),
            source,
        }
    }

    fn log_skip(&self, envelope: &EventEnvelope, id: &M::Id, reason: SkipReason) {
        match reason {
            SkipReason::Duplicate | SkipReason::Stale { .. } => debug!(
                entity = M::ENTITY,
                id = %id,
                event_id = %envelope.event_id(),
                version = envelope.version(),
                reason = ?reason,
                "event already reflected; no-op"
            ),
            SkipReason::MissingPredecessor(kind) => warn!(
                entity = M::ENTITY,
                id = %id,
                event_id = %envelope.event_id(),
                kind = %kind,
                "no projection to {} yet; discarded",
                if kind == EventKind::Deleted { "delete" } else { "update" }
            ),
            SkipReason::UnknownEventType => warn!(
                entity = M::ENTITY,
                event_id = %envelope.event_id(),
                event_type = %envelope.event_type(),
                "unknown event type; discarded"
            ),
        }
    }
}
