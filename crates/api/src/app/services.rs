//! Runtime wiring: Postgres pool → migrations → transport → publisher + consumer.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use mrp_infra::AppConfig;
use mrp_infra::migrations::migrate;
use mrp_infra::outbox::{OutboxPublisher, PgOutboxStore, PublisherHandle};
use mrp_infra::projections::{
    BomLineMapping, BomMapping, CategoryMapping, FactoryMapping, FactoryProjection,
    MaterialMapping, PartMapping, PgFactoryStock, PgProjectionStore, ProjectionDispatcher,
    ProjectionSynchronizer,
};
use mrp_infra::transport::{RedisStreamsConsumer, RedisStreamsTransport};
use mrp_infra::workers::WorkerHandle;

/// Every running background component.
#[derive(Debug)]
pub struct Services {
    pub pool: PgPool,
    pub outbox: Arc<PgOutboxStore>,
    publisher: Option<PublisherHandle>,
    consumer: Option<WorkerHandle>,
}

impl Services {
    /// Stop the consumer and drain the publisher's in-flight tick.
    pub async fn shutdown(self) {
        if let Some(consumer) = self.consumer {
            consumer.shutdown().await;
        }
        if let Some(publisher) = self.publisher {
            publisher.shutdown().await;
        }
        self.pool.close().await;
        info!("services stopped");
    }
}

/// One synchronizer per projected entity, all over Postgres.
pub fn projection_dispatcher(pool: &PgPool) -> ProjectionDispatcher {
    ProjectionDispatcher::new()
        .with_handler(ProjectionSynchronizer::<PartMapping, _>::new(PgProjectionStore::new(
            pool.clone(),
        )))
        .with_handler(ProjectionSynchronizer::<MaterialMapping, _>::new(
            PgProjectionStore::new(pool.clone()),
        ))
        .with_handler(ProjectionSynchronizer::<CategoryMapping, _>::new(
            PgProjectionStore::new(pool.clone()),
        ))
        .with_handler(ProjectionSynchronizer::<BomMapping, _>::new(PgProjectionStore::new(
            pool.clone(),
        )))
        .with_handler(ProjectionSynchronizer::<BomLineMapping, _>::new(
            PgProjectionStore::new(pool.clone()),
        ))
        .with_handler(FactoryProjection::new(
            PgProjectionStore::<FactoryMapping>::new(pool.clone()),
            PgProjectionStore::<MaterialMapping>::new(pool.clone()),
            PgFactoryStock::new(pool.clone()),
        ))
}

pub async fn start(config: &AppConfig) -> anyhow::Result<Services> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("connecting to postgres")?;
    migrate(&pool).await.context("applying migrations")?;

    let outbox = Arc::new(PgOutboxStore::new(pool.clone()));

    let publisher = if config.run_publisher {
        let transport = RedisStreamsTransport::connect(
            &config.redis_url,
            config.stream_prefix.clone(),
            config.partitions,
        )
        .await
        .context("connecting publisher transport")?;
        let publisher =
            OutboxPublisher::new(Arc::clone(&outbox), Arc::new(transport), config.publisher.clone());
        Some(publisher.spawn())
    } else {
        info!("outbox publisher disabled");
        None
    };

    let consumer = if config.run_projections {
        let consumer = RedisStreamsConsumer::connect(
            &config.redis_url,
            &config.stream_prefix,
            config.partitions,
            config.consumer_group.clone(),
            config.consumer_name.clone(),
        )
        .await
        .context("connecting projection consumer")?;
        let dispatcher = Arc::new(projection_dispatcher(&pool));
        info!(entities = ?dispatcher.entities(), "projection consumer starting");
        Some(consumer.spawn(dispatcher))
    } else {
        info!("projection consumer disabled");
        None
    };

    Ok(Services {
        pool,
        outbox,
        publisher,
        consumer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatcher_covers_every_projected_entity() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .expect("lazy pool");
        let mut entities = projection_dispatcher(&pool).entities();
        entities.sort_unstable();
        assert_eq!(
            entities,
            vec!["Bom", "BomLine", "Category", "Factory", "Material", "Part"]
        );
    }
}
