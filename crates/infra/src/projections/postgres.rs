//! Postgres projection tables.
//!
//! Every entity table has the same shape (see `migrations/0002_projections.sql`):
//! the entity id as primary key, the business fields as a JSONB `snapshot`, and the
//! protocol columns (`version`, `last_event_id`, `deleted`, timestamps). One generic
//! store serves them all; the mapping supplies table and column names.

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use mrp_core::{EventId, FactoryId, MaterialId};

use super::{FactoryStockStore, ProjectionError, ProjectionMapping, ProjectionRecord, ProjectionStore};

/// Generic JSONB-backed projection store.
#[derive(Debug)]
pub struct PgProjectionStore<M> {
    pool: PgPool,
    _mapping: PhantomData<fn() -> M>,
}

impl<M> Clone for PgProjectionStore<M> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _mapping: PhantomData,
        }
    }
}

impl<M: ProjectionMapping> PgProjectionStore<M> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _mapping: PhantomData,
        }
    }

    fn select_sql(filter: &str) -> String {
        format!(
            "SELECT {id} AS id, snapshot, version, last_event_id, deleted, source_updated_at, \
             updated_at FROM {table} {filter}",
            id = M::ID_COLUMN,
            table = M::TABLE,
        )
    }

    fn decode(row: &PgRow) -> Result<ProjectionRecord<M>, ProjectionError> {
        let raw = ProjectionRow::from_row(row)
            .map_err(|e| ProjectionError::Storage(format!("failed to decode {} row: {e}", M::TABLE)))?;
        let fields = serde_json::from_value(raw.snapshot).map_err(|e| {
            ProjectionError::Storage(format!("corrupt {} snapshot for {}: {e}", M::TABLE, raw.id))
        })?;
        Ok(ProjectionRecord {
            id: M::Id::from(raw.id),
            fields,
            version: raw.version,
            last_event_id: EventId::from_uuid(raw.last_event_id),
            deleted: raw.deleted,
            source_updated_at: raw.source_updated_at,
            updated_at: raw.updated_at,
        })
    }
}

#[async_trait]
impl<M: ProjectionMapping> ProjectionStore<M> for PgProjectionStore<M> {
    #[instrument(skip(self), fields(entity = M::ENTITY, id = %id), err)]
    async fn find_by_id_including_deleted(
        &self,
        id: M::Id,
    ) -> Result<Option<ProjectionRecord<M>>, ProjectionError> {
        let key: i64 = id.into();
        let sql = Self::select_sql(&format!("WHERE {} = $1", M::ID_COLUMN));
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(M::TABLE, "find", e))?;
        row.as_ref().map(Self::decode).transpose()
    }

    #[instrument(
        skip(self, record),
        fields(entity = M::ENTITY, id = %record.id, version = record.version),
        err
    )]
    async fn save(
        &self,
        record: &ProjectionRecord<M>,
        expected_version: Option<i64>,
    ) -> Result<bool, ProjectionError> {
        let snapshot = serde_json::to_value(&record.fields).map_err(|e| {
            ProjectionError::Storage(format!("cannot serialize {} snapshot: {e}", M::TABLE))
        })?;
        let id: i64 = record.id.into();

        let result = match expected_version {
            None => {
                let sql = format!(
                    "INSERT INTO {table} ({id_col}, snapshot, version, last_event_id, deleted, \
                     source_updated_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7) \
                     ON CONFLICT ({id_col}) DO NOTHING",
                    table = M::TABLE,
                    id_col = M::ID_COLUMN,
                );
                sqlx::query(&sql)
                    .bind(id)
                    .bind(&snapshot)
                    .bind(record.version)
                    .bind(*record.last_event_id.as_uuid())
                    .bind(record.deleted)
                    .bind(record.source_updated_at)
                    .bind(record.updated_at)
                    .execute(&self.pool)
                    .await
            }
            Some(expected) => {
                let sql = format!(
                    "UPDATE {table} SET snapshot = $2, version = $3, last_event_id = $4, \
                     deleted = $5, source_updated_at = $6, updated_at = $7 \
                     WHERE {id_col} = $1 AND version = $8",
                    table = M::TABLE,
                    id_col = M::ID_COLUMN,
                );
                sqlx::query(&sql)
                    .bind(id)
                    .bind(&snapshot)
                    .bind(record.version)
                    .bind(*record.last_event_id.as_uuid())
                    .bind(record.deleted)
                    .bind(record.source_updated_at)
                    .bind(record.updated_at)
                    .bind(expected)
                    .execute(&self.pool)
                    .await
            }
        }
        .map_err(|e| map_sqlx_error(M::TABLE, "save", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(entity = M::ENTITY), err)]
    async fn list_active(&self) -> Result<Vec<ProjectionRecord<M>>, ProjectionError> {
        let sql = Self::select_sql(&format!("WHERE NOT deleted ORDER BY {}", M::ID_COLUMN));
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(M::TABLE, "list_active", e))?;
        rows.iter().map(Self::decode).collect()
    }
}

/// `factory_material_stock` table.
#[derive(Debug, Clone)]
pub struct PgFactoryStock {
    pool: PgPool,
}

impl PgFactoryStock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FactoryStockStore for PgFactoryStock {
    #[instrument(skip(self, materials), fields(factory_id = %factory_id, materials = materials.len()), err)]
    async fn seed_zero(
        &self,
        factory_id: FactoryId,
        materials: &[MaterialId],
    ) -> Result<usize, ProjectionError> {
        if materials.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = materials.iter().map(|m| m.get()).collect();
        let result = sqlx::query(
            r#"
            INSERT INTO factory_material_stock (factory_id, material_id, quantity)
            SELECT $1, material_id, 0
            FROM UNNEST($2::BIGINT[]) AS t(material_id)
            ON CONFLICT (factory_id, material_id) DO NOTHING
            "#,
        )
        .bind(factory_id.get())
        .bind(&ids)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("factory_material_stock", "seed_zero", e))?;
        Ok(result.rows_affected() as usize)
    }

    async fn quantity(
        &self,
        factory_id: FactoryId,
        material_id: MaterialId,
    ) -> Result<Option<f64>, ProjectionError> {
        sqlx::query_scalar(
            "SELECT quantity::FLOAT8 FROM factory_material_stock \
             WHERE factory_id = $1 AND material_id = $2",
        )
        .bind(factory_id.get())
        .bind(material_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("factory_material_stock", "quantity", e))
    }
}

/// Raw projection row; `snapshot` is decoded by the mapping.
#[derive(Debug)]
struct ProjectionRow {
    id: i64,
    snapshot: JsonValue,
    version: i64,
    last_event_id: Uuid,
    deleted: bool,
    source_updated_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ProjectionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProjectionRow {
            id: row.try_get("id")?,
            snapshot: row.try_get("snapshot")?,
            version: row.try_get("version")?,
            last_event_id: row.try_get("last_event_id")?,
            deleted: row.try_get("deleted")?,
            source_updated_at: row.try_get("source_updated_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn map_sqlx_error(table: &str, operation: &str, err: sqlx::Error) -> ProjectionError {
    match err {
        sqlx::Error::Database(db_err) => ProjectionError::Storage(format!(
            "database error in {table}.{operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            ProjectionError::Storage(format!("connection pool closed in {table}.{operation}"))
        }
        other => ProjectionError::Storage(format!("sqlx error in {table}.{operation}: {other}")),
    }
}
