//! Postgres-backed outbox.
//!
//! ## Claiming
//!
//! A tick opens a transaction and selects its batch with `FOR UPDATE SKIP LOCKED`.
//! The row locks are held while the batch is delivered and released by the commit
//! that records the outcomes, so concurrent publishers (other replicas) skip those
//! rows instead of blocking on them or delivering them twice. If the publisher dies
//! mid-batch the transaction aborts and the rows become claimable again.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | OutboxError |
//! |------------|-----------------|-------------|
//! | Database (unique violation on `event_id`) | `23505` | `DuplicateEvent` |
//! | Database (other) | any | `Storage` |
//! | PoolClosed / IO / other | N/A | `Storage` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use mrp_core::{EventId, OutboxId};

use super::{
    DeliveryOutcome, NewOutboxRecord, OutboxClaim, OutboxError, OutboxRecord, OutboxStatus,
    OutboxStore, OutboxWriter, StatusCounts,
};

const SELECT_COLUMNS: &str = r#"
    id, event_id, aggregate_id, event_type, version, payload, status, occurred_at,
    retry_count, last_error, last_tried_at, next_retry_at, published_at
"#;

/// Postgres outbox store over the `outbox_events` table.
#[derive(Debug, Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// A claimed batch holding its row locks in an open transaction.
#[derive(Debug)]
pub struct PgClaim {
    tx: Transaction<'static, Postgres>,
    records: Vec<OutboxRecord>,
}

#[async_trait]
impl OutboxClaim for PgClaim {
    fn records(&self) -> &[OutboxRecord] {
        &self.records
    }

    #[instrument(skip(self, outcome), fields(id = %id, status = %outcome.status()), err)]
    async fn record_outcome(
        &mut self,
        id: OutboxId,
        outcome: &DeliveryOutcome,
    ) -> Result<(), OutboxError> {
        let query = match outcome {
            DeliveryOutcome::Published { at } => sqlx::query(
                r#"
                UPDATE outbox_events
                SET status = 'PUBLISHED',
                    published_at = $2,
                    last_tried_at = $2,
                    next_retry_at = NULL
                WHERE id = $1
                "#,
            )
            .bind(id.get())
            .bind(*at),
            DeliveryOutcome::Failed {
                retry_count,
                error,
                tried_at,
                next_retry_at,
            } => sqlx::query(
                r#"
                UPDATE outbox_events
                SET status = 'FAILED',
                    retry_count = $2,
                    last_error = $3,
                    last_tried_at = $4,
                    next_retry_at = $5
                WHERE id = $1
                "#,
            )
            .bind(id.get())
            .bind(*retry_count)
            .bind(error.as_str())
            .bind(*tried_at)
            .bind(*next_retry_at),
            DeliveryOutcome::Dead {
                retry_count,
                error,
                tried_at,
            } => sqlx::query(
                r#"
                UPDATE outbox_events
                SET status = 'DEAD',
                    retry_count = $2,
                    last_error = $3,
                    last_tried_at = $4,
                    next_retry_at = NULL
                WHERE id = $1
                "#,
            )
            .bind(id.get())
            .bind(*retry_count)
            .bind(error.as_str())
            .bind(*tried_at),
        };

        query
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("record_outcome", e))?;
        Ok(())
    }

    async fn commit(self) -> Result<(), OutboxError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_claim", e))
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    type Claim = PgClaim;

    #[instrument(skip(self), fields(claimed = tracing::field::Empty), err)]
    async fn claim_due(
        &self,
        limit: usize,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<PgClaim, OutboxError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_claim", e))?;

        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM outbox_events
            WHERE status IN ('READY', 'FAILED')
              AND retry_count < $1
              AND (next_retry_at IS NULL OR next_retry_at <= $2)
            ORDER BY occurred_at ASC, id ASC
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(i32::try_from(max_retries).unwrap_or(i32::MAX))
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("claim_due", e))?;

        let records = decode_rows(rows)?;
        tracing::Span::current().record("claimed", records.len());
        Ok(PgClaim { tx, records })
    }

    #[instrument(skip(self), fields(status = %status), err)]
    async fn find_by_status(
        &self,
        status: OutboxStatus,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, OutboxError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_events WHERE status = $1 \
             ORDER BY occurred_at ASC, id ASC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_status", e))?;
        decode_rows(rows)
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    async fn find_by_event_id(
        &self,
        event_id: EventId,
    ) -> Result<Option<OutboxRecord>, OutboxError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM outbox_events WHERE event_id = $1");
        let row = sqlx::query(&sql)
            .bind(*event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_event_id", e))?;
        row.map(|r| decode_row(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn status_counts(&self) -> Result<StatusCounts, OutboxError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM outbox_events GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("status_counts", e))?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| map_sqlx_error("status_counts", e))?;
            let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("status_counts", e))?;
            let status = status.parse::<OutboxStatus>().map_err(OutboxError::Storage)?;
            counts.add(status, u64::try_from(n).unwrap_or(0));
        }
        Ok(counts)
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    async fn requeue_dead(&self, event_id: EventId) -> Result<OutboxRecord, OutboxError> {
        let sql = format!(
            r#"
            UPDATE outbox_events
            SET status = 'READY',
                retry_count = 0,
                last_error = NULL,
                last_tried_at = NULL,
                next_retry_at = NULL
            WHERE event_id = $1 AND status = 'DEAD'
            RETURNING {SELECT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(*event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("requeue_dead", e))?;

        match row {
            Some(row) => decode_row(&row),
            None => match self.find_by_event_id(event_id).await? {
                Some(existing) => Err(OutboxError::InvalidTransition {
                    event_id,
                    from: existing.status,
                    to: OutboxStatus::Ready,
                }),
                None => Err(OutboxError::NotFound(event_id)),
            },
        }
    }
}

/// Inserts go through the caller's transaction: `enqueue(&mut tx, ..)`.
#[async_trait]
impl OutboxWriter for Transaction<'static, Postgres> {
    #[instrument(
        skip(self, record),
        fields(event_id = %record.event_id, aggregate_id = %record.aggregate_id),
        err
    )]
    async fn insert(&mut self, record: NewOutboxRecord) -> Result<OutboxId, OutboxError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO outbox_events (
                event_id, aggregate_id, event_type, version, payload, status, occurred_at,
                retry_count
            )
            VALUES ($1, $2, $3, $4, $5, 'READY', $6, 0)
            RETURNING id
            "#,
        )
        .bind(*record.event_id.as_uuid())
        .bind(&record.aggregate_id)
        .bind(&record.event_type)
        .bind(record.version)
        .bind(&record.payload)
        .bind(record.occurred_at)
        .fetch_one(&mut **self)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                OutboxError::DuplicateEvent(record.event_id)
            } else {
                map_sqlx_error("insert_outbox_event", e)
            }
        })?;
        Ok(OutboxId::new(id))
    }

    async fn lock_aggregate(&mut self, aggregate_id: &str) -> Result<(), OutboxError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(aggregate_id)
            .execute(&mut **self)
            .await
            .map_err(|e| map_sqlx_error("lock_aggregate", e))?;
        Ok(())
    }

    async fn last_version(&mut self, aggregate_id: &str) -> Result<Option<i64>, OutboxError> {
        sqlx::query_scalar("SELECT MAX(version) FROM outbox_events WHERE aggregate_id = $1")
            .bind(aggregate_id)
            .fetch_one(&mut **self)
            .await
            .map_err(|e| map_sqlx_error("last_version", e))
    }
}

fn decode_rows(rows: Vec<PgRow>) -> Result<Vec<OutboxRecord>, OutboxError> {
    rows.iter().map(decode_row).collect()
}

fn decode_row(row: &PgRow) -> Result<OutboxRecord, OutboxError> {
    OutboxRow::from_row(row)
        .map_err(|e| OutboxError::Storage(format!("failed to decode outbox row: {e}")))?
        .try_into()
}

/// Raw `outbox_events` row.
#[derive(Debug)]
struct OutboxRow {
    id: i64,
    event_id: Uuid,
    aggregate_id: String,
    event_type: String,
    version: i64,
    payload: JsonValue,
    status: String,
    occurred_at: DateTime<Utc>,
    retry_count: i32,
    last_error: Option<String>,
    last_tried_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
    published_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for OutboxRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OutboxRow {
            id: row.try_get("id")?,
            event_id: row.try_get("event_id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_type: row.try_get("event_type")?,
            version: row.try_get("version")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            occurred_at: row.try_get("occurred_at")?,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
            last_tried_at: row.try_get("last_tried_at")?,
            next_retry_at: row.try_get("next_retry_at")?,
            published_at: row.try_get("published_at")?,
        })
    }
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = OutboxError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(OutboxRecord {
            id: OutboxId::new(row.id),
            event_id: EventId::from_uuid(row.event_id),
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            version: row.version,
            payload: row.payload,
            status: row.status.parse().map_err(OutboxError::Storage)?,
            occurred_at: row.occurred_at,
            retry_count: row.retry_count,
            last_error: row.last_error,
            last_tried_at: row.last_tried_at,
            next_retry_at: row.next_retry_at,
            published_at: row.published_at,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutboxError {
    match err {
        sqlx::Error::Database(db_err) => OutboxError::Storage(format!(
            "database error in {}: {} (code {})",
            operation,
            db_err.message(),
            db_err.code().as_deref().unwrap_or("none")
        )),
        sqlx::Error::PoolClosed => {
            OutboxError::Storage(format!("connection pool closed in {operation}"))
        }
        other => OutboxError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
