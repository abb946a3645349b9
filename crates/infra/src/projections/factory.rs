use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use mrp_catalog::Factory;
use mrp_core::{FactoryId, MaterialId};
use mrp_events::{EventEnvelope, SyncOutcome};

use super::{
    EnvelopeHandler, FactoryStockStore, MaterialMapping, ProjectionError, ProjectionMapping,
    ProjectionStore, ProjectionSynchronizer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FactoryMapping;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryFields {
    pub code: String,
    pub name: String,
    pub location: Option<String>,
}

impl ProjectionMapping for FactoryMapping {
    const ENTITY: &'static str = "Factory";
    const TABLE: &'static str = "factory_projection";
    const ID_COLUMN: &'static str = "factory_id";
    const ID_FIELD: &'static str = "factoryId";

    type Id = FactoryId;
    type Fields = FactoryFields;

    fn fields_from(envelope: &EventEnvelope) -> Result<FactoryFields, serde_json::Error> {
        let f: Factory = envelope.decode_payload()?;
        Ok(FactoryFields {
            code: f.code,
            name: f.name,
            location: f.location,
        })
    }
}

/// Factory synchronizer that also seeds stock rows for a newly projected factory.
///
/// Seeding inserts a zero-quantity row per active material. It runs after the factory
/// row is written and is best-effort: a failure is logged and never undoes or fails
/// the factory projection itself.
#[derive(Debug)]
pub struct FactoryProjection<F, Mt, K> {
    sync: ProjectionSynchronizer<FactoryMapping, F>,
    materials: Mt,
    stock: K,
}

impl<F, Mt, K> FactoryProjection<F, Mt, K>
where
    F: ProjectionStore<FactoryMapping>,
    Mt: ProjectionStore<MaterialMapping>,
    K: FactoryStockStore,
{
    pub fn new(factories: F, materials: Mt, stock: K) -> Self {
        Self {
            sync: ProjectionSynchronizer::new(factories),
            materials,
            stock,
        }
    }

    pub fn factories(&self) -> &F {
        self.sync.store()
    }

    pub async fn apply(&self, envelope: &EventEnvelope) -> Result<SyncOutcome, ProjectionError> {
        let outcome = self.sync.apply(envelope).await?;
        if outcome == SyncOutcome::Inserted {
            let factory_id = FactoryMapping::id_of(envelope).map_err(|source| {
                ProjectionError::Decode {
                    entity: FactoryMapping::ENTITY,
                    event_id: envelope.event_id(),
                    source,
                }
            })?;
            self.seed(factory_id).await;
        }
        Ok(outcome)
    }

    async fn seed(&self, factory_id: FactoryId) {
        let materials: Vec<MaterialId> = match self.materials.list_active().await {
            Ok(rows) => rows.into_iter().map(|r| r.id).collect(),
            Err(err) => {
                warn!(factory_id = %factory_id, error = %err, "cannot list materials for stock seeding");
                return;
            }
        };

        match self.stock.seed_zero(factory_id, &materials).await {
            Ok(created) => info!(
                factory_id = %factory_id,
                materials = materials.len(),
                created,
                "seeded factory stock rows"
            ),
            Err(err) => warn!(
                factory_id = %factory_id,
                error = %err,
                "factory stock seeding failed; factory projection kept"
            ),
        }
    }
}

#[async_trait]
impl<F, Mt, K> EnvelopeHandler for FactoryProjection<F, Mt, K>
where
    F: ProjectionStore<FactoryMapping>,
    Mt: ProjectionStore<MaterialMapping>,
    K: FactoryStockStore,
{
    fn entity(&self) -> &'static str {
        FactoryMapping::ENTITY
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<SyncOutcome, ProjectionError> {
        self.apply(envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use mrp_core::EventId;
    use serde_json::json;

    use crate::projections::{InMemoryFactoryStock, InMemoryProjectionStore};

    struct BrokenStock;

    #[async_trait]
    impl FactoryStockStore for BrokenStock {
        async fn seed_zero(&self, _: FactoryId, _: &[MaterialId]) -> Result<usize, ProjectionError> {
            Err(ProjectionError::Storage("stock table offline".into()))
        }

        async fn quantity(&self, _: FactoryId, _: MaterialId) -> Result<Option<f64>, ProjectionError> {
            Ok(None)
        }
    }

    fn material(id: i64, version: i64) -> EventEnvelope {
        EventEnvelope::new(
            EventId::new(),
            "MaterialCreated",
            version,
            Utc::now(),
            json!({
                "materialId": id,
                "code": format!("M-{id}"),
                "name": "steel",
                "unitOfMeasure": "kg",
            }),
        )
    }

    fn factory_created(id: i64) -> EventEnvelope {
        EventEnvelope::new(
            EventId::new(),
            "FactoryCreated",
            1,
            Utc::now(),
            json!({"factoryId": id, "code": "F1", "name": "Plant 1"}),
        )
    }

    async fn materials(ids: &[i64]) -> Arc<InMemoryProjectionStore<MaterialMapping>> {
        let store = InMemoryProjectionStore::<MaterialMapping>::arc();
        let sync = ProjectionSynchronizer::<MaterialMapping, _>::new(Arc::clone(&store));
        for id in ids {
            sync.apply(&material(*id, 1)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn new_factory_gets_zero_rows_for_each_material() {
        let stock = Arc::new(InMemoryFactoryStock::new());
        let projection = FactoryProjection::new(
            InMemoryProjectionStore::<FactoryMapping>::arc(),
            materials(&[1, 2, 3]).await,
            Arc::clone(&stock),
        );

        let outcome = projection.apply(&factory_created(7)).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Inserted);

        let rows = stock.rows_for(FactoryId::new(7));
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|(_, q)| *q == 0.0));
    }

    #[tokio::test]
    async fn seeding_failure_keeps_the_factory() {
        let projection = FactoryProjection::new(
            InMemoryProjectionStore::<FactoryMapping>::arc(),
            materials(&[1]).await,
            BrokenStock,
        );

        let outcome = projection.apply(&factory_created(7)).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Inserted);
        assert!(
            projection
                .factories()
                .find_by_id(FactoryId::new(7))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn redelivered_create_does_not_reseed() {
        let stock = Arc::new(InMemoryFactoryStock::new());
        let projection = FactoryProjection::new(
            InMemoryProjectionStore::<FactoryMapping>::arc(),
            materials(&[1]).await,
            Arc::clone(&stock),
        );
        let created = factory_created(7);
        projection.apply(&created).await.unwrap();
        let again = projection.apply(&created).await.unwrap();
        assert!(!again.is_applied());
        assert_eq!(stock.rows_for(FactoryId::new(7)).len(), 1);
    }
}
