use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use mrp_core::{FactoryId, MaterialId};

use super::ProjectionError;

/// Per-factory material stock rows.
#[async_trait]
pub trait FactoryStockStore: Send + Sync {
    /// Insert a zero-quantity row for every `(factory, material)` pair that has none.
    /// Returns the number of rows created; existing rows are left untouched.
    async fn seed_zero(
        &self,
        factory_id: FactoryId,
        materials: &[MaterialId],
    ) -> Result<usize, ProjectionError>;

    async fn quantity(
        &self,
        factory_id: FactoryId,
        material_id: MaterialId,
    ) -> Result<Option<f64>, ProjectionError>;
}

#[async_trait]
impl<T: FactoryStockStore + ?Sized> FactoryStockStore for Arc<T> {
    async fn seed_zero(
        &self,
        factory_id: FactoryId,
        materials: &[MaterialId],
    ) -> Result<usize, ProjectionError> {
        (**self).seed_zero(factory_id, materials).await
    }

    async fn quantity(
        &self,
        factory_id: FactoryId,
        material_id: MaterialId,
    ) -> Result<Option<f64>, ProjectionError> {
        (**self).quantity(factory_id, material_id).await
    }
}

/// In-memory stock rows for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryFactoryStock {
    rows: RwLock<BTreeMap<(FactoryId, MaterialId), f64>>,
}

impl InMemoryFactoryStock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows_for(&self, factory_id: FactoryId) -> Vec<(MaterialId, f64)> {
        self.rows
            .read()
            .map(|rows| {
                rows.iter()
                    .filter(|((f, _), _)| *f == factory_id)
                    .map(|((_, m), q)| (*m, *q))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl FactoryStockStore for InMemoryFactoryStock {
    async fn seed_zero(
        &self,
        factory_id: FactoryId,
        materials: &[MaterialId],
    ) -> Result<usize, ProjectionError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| ProjectionError::Storage("stock lock poisoned".into()))?;
        let mut created = 0;
        for m in materials {
            if !rows.contains_key(&(factory_id, *m)) {
                rows.insert((factory_id, *m), 0.0);
                created += 1;
            }
        }
        Ok(created)
    }

    async fn quantity(
        &self,
        factory_id: FactoryId,
        material_id: MaterialId,
    ) -> Result<Option<f64>, ProjectionError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| ProjectionError::Storage("stock lock poisoned".into()))?;
        Ok(rows.get(&(factory_id, material_id)).copied())
    }
}
