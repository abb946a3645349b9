use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use mrp_core::{EventId, OutboxId};

use super::{DeliveryOutcome, NewOutboxRecord, OutboxError, OutboxRecord, OutboxStatus};

/// Write side of the outbox, bound to the caller's open transaction.
///
/// Implementations never commit on their own: the row becomes visible exactly when
/// the surrounding domain transaction commits.
#[async_trait]
pub trait OutboxWriter: Send {
    /// Insert one READY row. A repeated `event_id` is [`OutboxError::DuplicateEvent`].
    async fn insert(&mut self, record: NewOutboxRecord) -> Result<OutboxId, OutboxError>;

    /// Serialize writers of one aggregate until this transaction ends.
    async fn lock_aggregate(&mut self, aggregate_id: &str) -> Result<(), OutboxError>;

    /// Highest version recorded for an aggregate, as seen by this transaction.
    async fn last_version(&mut self, aggregate_id: &str) -> Result<Option<i64>, OutboxError>;
}

/// A batch of rows claimed by one publisher tick.
///
/// The rows stay exclusively owned until [`OutboxClaim::commit`]; dropping the claim
/// without committing discards recorded outcomes and releases the rows.
#[async_trait]
pub trait OutboxClaim: Send {
    fn records(&self) -> &[OutboxRecord];

    async fn record_outcome(
        &mut self,
        id: OutboxId,
        outcome: &DeliveryOutcome,
    ) -> Result<(), OutboxError>;

    async fn commit(self) -> Result<(), OutboxError>;
}

/// Outbox row counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct StatusCounts {
    pub ready: u64,
    pub published: u64,
    pub failed: u64,
    pub dead: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: OutboxStatus, n: u64) {
        match status {
            OutboxStatus::Ready => self.ready += n,
            OutboxStatus::Published => self.published += n,
            OutboxStatus::Failed => self.failed += n,
            OutboxStatus::Dead => self.dead += n,
        }
    }

    /// Rows the publisher will still attempt.
    pub fn pending(&self) -> u64 {
        self.ready + self.failed
    }
}

/// Read/claim side of the outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    type Claim: OutboxClaim;

    /// Claim up to `limit` due rows (READY/FAILED, `retry_count < max_retries`,
    /// `next_retry_at` elapsed) oldest first, skipping rows another claim holds.
    async fn claim_due(
        &self,
        limit: usize,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Self::Claim, OutboxError>;

    /// Rows in `status`, oldest first.
    async fn find_by_status(
        &self,
        status: OutboxStatus,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, OutboxError>;

    async fn find_by_event_id(
        &self,
        event_id: EventId,
    ) -> Result<Option<OutboxRecord>, OutboxError>;

    async fn status_counts(&self) -> Result<StatusCounts, OutboxError>;

    /// Move a DEAD row back to READY with cleared retry bookkeeping.
    async fn requeue_dead(&self, event_id: EventId) -> Result<OutboxRecord, OutboxError>;
}
