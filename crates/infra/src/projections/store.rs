use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{ProjectionError, ProjectionMapping, ProjectionRecord};

/// Durable table of one entity's projection records.
#[async_trait]
pub trait ProjectionStore<M: ProjectionMapping>: Send + Sync {
    /// The stored record regardless of its soft-delete flag.
    async fn find_by_id_including_deleted(
        &self,
        id: M::Id,
    ) -> Result<Option<ProjectionRecord<M>>, ProjectionError>;

    /// Compare-and-set write.
    ///
    /// `expected_version = None` inserts only if no row exists; `Some(v)` replaces
    /// only a row still at version `v`. Returns `false` when the condition no longer
    /// holds (a concurrent writer got there first).
    async fn save(
        &self,
        record: &ProjectionRecord<M>,
        expected_version: Option<i64>,
    ) -> Result<bool, ProjectionError>;

    /// All non-deleted records, ordered by id.
    async fn list_active(&self) -> Result<Vec<ProjectionRecord<M>>, ProjectionError>;

    /// Standard read: deleted rows are invisible.
    async fn find_by_id(&self, id: M::Id) -> Result<Option<ProjectionRecord<M>>, ProjectionError> {
        Ok(self
            .find_by_id_including_deleted(id)
            .await?
            .filter(|r| !r.deleted))
    }
}

#[async_trait]
impl<M, S> ProjectionStore<M> for Arc<S>
where
    M: ProjectionMapping,
    S: ProjectionStore<M> + ?Sized,
{
    async fn find_by_id_including_deleted(
        &self,
        id: M::Id,
    ) -> Result<Option<ProjectionRecord<M>>, ProjectionError> {
        (**self).find_by_id_including_deleted(id).await
    }

    async fn save(
        &self,
        record: &ProjectionRecord<M>,
        expected_version: Option<i64>,
    ) -> Result<bool, ProjectionError> {
        (**self).save(record, expected_version).await
    }

    async fn list_active(&self) -> Result<Vec<ProjectionRecord<M>>, ProjectionError> {
        (**self).list_active().await
    }
}

/// In-memory projection store for tests/dev.
#[derive(Debug)]
pub struct InMemoryProjectionStore<M: ProjectionMapping> {
    rows: RwLock<BTreeMap<M::Id, ProjectionRecord<M>>>,
}

impl<M: ProjectionMapping> InMemoryProjectionStore<M> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored rows, deleted ones included.
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M: ProjectionMapping> Default for InMemoryProjectionStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> ProjectionError {
    ProjectionError::Storage("projection lock poisoned".into())
}

#[async_trait]
impl<M: ProjectionMapping> ProjectionStore<M> for InMemoryProjectionStore<M> {
    async fn find_by_id_including_deleted(
        &self,
        id: M::Id,
    ) -> Result<Option<ProjectionRecord<M>>, ProjectionError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.get(&id).cloned())
    }

    async fn save(
        &self,
        record: &ProjectionRecord<M>,
        expected_version: Option<i64>,
    ) -> Result<bool, ProjectionError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        let current = rows.get(&record.id).map(|r| r.version);
        if current != expected_version {
            return Ok(false);
        }
        rows.insert(record.id, record.clone());
        Ok(true)
    }

    async fn list_active(&self) -> Result<Vec<ProjectionRecord<M>>, ProjectionError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.values().filter(|r| !r.deleted).cloned().collect())
    }
}
