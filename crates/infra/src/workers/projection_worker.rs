use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use mrp_events::{Delivery, Subscription, SyncOutcome};

use crate::projections::ProjectionDispatcher;

/// Handle to stop and join a background consumer task.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn new(shutdown: watch::Sender<bool>, join: JoinHandle<()>) -> Self {
        Self {
            shutdown,
            join: Some(join),
        }
    }

    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// The envelope being applied when the signal arrives is finished first.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                warn!(error = %err, "worker task ended abnormally");
            }
        }
    }
}

/// Generic projection consumer loop.
///
/// - Receives deliveries from a subscription
/// - Routes each envelope through the dispatcher (idempotent, at-least-once safe)
/// - A failing envelope is logged and does not stop the loop
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Spawn a tokio task that drains `subscription` until shutdown or until the
    /// transport goes away.
    pub fn spawn(
        name: &'static str,
        mut subscription: Subscription<Delivery>,
        dispatcher: Arc<ProjectionDispatcher>,
    ) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(
            async move {
                info!(entities = ?dispatcher.entities(), "projection worker started");
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => break,
                        delivery = subscription.recv() => match delivery {
                            Some(delivery) => apply_one(&dispatcher, &delivery).await,
                            None => {
                                debug!("subscription closed");
                                break;
                            }
                        },
                    }
                }
                info!("projection worker stopped");
            }
            .instrument(info_span!("projection_worker", worker = name)),
        );

        WorkerHandle::new(shutdown_tx, join)
    }
}

async fn apply_one(dispatcher: &ProjectionDispatcher, delivery: &Delivery) {
    let envelope = &delivery.envelope;
    match dispatcher.dispatch(envelope).await {
        Ok(SyncOutcome::Skipped(_)) => {}
        Ok(outcome) => debug!(
            event_id = %envelope.event_id(),
            event_type = %envelope.event_type(),
            partition = delivery.partition,
            outcome = outcome.label(),
            "projection updated"
        ),
        Err(err) => error!(
            event_id = %envelope.event_id(),
            event_type = %envelope.event_type(),
            transient = err.is_transient(),
            error = %err,
            "projection apply failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use mrp_core::{EventId, PartId};
    use mrp_events::{EventEnvelope, InMemoryTransport, Transport};
    use serde_json::json;

    use crate::projections::{
        InMemoryProjectionStore, PartMapping, ProjectionStore, ProjectionSynchronizer,
    };

    fn part_created(id: i64, version: i64) -> EventEnvelope {
        EventEnvelope::new(
            EventId::new(),
            "PartCreated",
            version,
            Utc::now(),
            json!({
                "partId": id,
                "code": format!("P-{id}"),
                "name": "Bracket",
                "categoryId": null,
                "unitOfMeasure": "EA",
                "leadTimeDays": 3,
            }),
        )
    }

    #[tokio::test]
    async fn applies_deliveries_and_survives_bad_payloads() {
        let transport = InMemoryTransport::new(2);
        let parts = InMemoryProjectionStore::<PartMapping>::arc();
        let dispatcher = Arc::new(
            ProjectionDispatcher::new()
                .with_handler(ProjectionSynchronizer::<PartMapping, _>::new(Arc::clone(&parts))),
        );
        let handle = ProjectionWorker::spawn("parts", transport.subscribe(), dispatcher);

        let poison = EventEnvelope::new(EventId::new(), "PartCreated", 1, Utc::now(), json!({"partId": 5}));
        transport.send("5", &poison).await.unwrap();
        transport.send("7", &part_created(7, 1)).await.unwrap();

        let mut waited = 0;
        while parts.find_by_id(PartId::from(7)).await.unwrap().is_none() && waited < 200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            waited += 1;
        }
        handle.shutdown().await;

        assert!(parts.find_by_id(PartId::from(7)).await.unwrap().is_some());
        assert!(parts.find_by_id(PartId::from(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stops_on_shutdown_with_idle_subscription() {
        let transport = InMemoryTransport::new(1);
        let handle = ProjectionWorker::spawn(
            "idle",
            transport.subscribe(),
            Arc::new(ProjectionDispatcher::new()),
        );
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("worker should stop promptly");
    }
}
