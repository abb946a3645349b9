//! Outbox publisher.
//!
//! One [`OutboxPublisher::tick`] is one unit of work: claim a bounded batch, deliver
//! each row with an acknowledged send, record each outcome, commit. A row's failure
//! only affects that row. [`OutboxPublisher::spawn`] runs ticks on an interval until
//! shut down.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use mrp_events::Transport;

use crate::PublisherConfig;

use super::{DeliveryOutcome, OutboxClaim, OutboxRecord, OutboxStore, RetryPolicy};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
    pub dead: usize,
}

impl TickReport {
    fn count(&mut self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Published { .. } => self.published += 1,
            DeliveryOutcome::Failed { .. } => self.failed += 1,
            DeliveryOutcome::Dead { .. } => self.dead += 1,
        }
    }
}

/// Polls the outbox and delivers due rows to a transport.
#[derive(Debug)]
pub struct OutboxPublisher<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    config: PublisherConfig,
    policy: RetryPolicy,
}

impl<S, T> OutboxPublisher<S, T>
where
    S: OutboxStore + 'static,
    T: Transport + 'static,
{
    pub fn new(store: Arc<S>, transport: Arc<T>, config: PublisherConfig) -> Self {
        let policy = config.retry_policy();
        Self {
            store,
            transport,
            config,
            policy,
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Claim, deliver and commit one batch.
    ///
    /// Storage failures end the tick early; any outcomes not yet committed are rolled
    /// back with the claim, so those rows are simply claimed again later.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        let mut claim = match self
            .store
            .claim_due(self.config.batch_size, self.config.max_retries, Utc::now())
            .await
        {
            Ok(claim) => claim,
            Err(err) => {
                error!(error = %err, "outbox claim failed");
                return report;
            }
        };

        let records: Vec<OutboxRecord> = claim.records().to_vec();
        report.claimed = records.len();
        if records.is_empty() {
            return report;
        }

        let mut delivered = TickReport {
            claimed: report.claimed,
            ..TickReport::default()
        };
        for record in &records {
            let outcome = self.deliver(record).await;
            if let Err(err) = claim.record_outcome(record.id, &outcome).await {
                error!(
                    error = %err,
                    event_id = %record.event_id,
                    "failed to record delivery outcome; rolling back tick"
                );
                return report;
            }
            delivered.count(&outcome);
        }

        if let Err(err) = claim.commit().await {
            error!(error = %err, claimed = report.claimed, "outbox tick commit failed");
            return report;
        }

        if delivered.claimed > 0 {
            info!(
                claimed = delivered.claimed,
                published = delivered.published,
                failed = delivered.failed,
                dead = delivered.dead,
                "outbox tick complete"
            );
        }
        delivered
    }

    async fn deliver(&self, record: &OutboxRecord) -> DeliveryOutcome {
        let envelope = match record.envelope() {
            Ok(env) => env,
            Err(err) => {
                return self.failure(record, &format!("undecodable outbox payload: {err}"));
            }
        };

        let sent = tokio::time::timeout(
            self.config.send_timeout,
            self.transport.send(&record.aggregate_id, &envelope),
        )
        .await;

        match sent {
            Ok(Ok(())) => {
                debug!(
                    event_id = %record.event_id,
                    aggregate_id = %record.aggregate_id,
                    event_type = %record.event_type,
                    "outbox event published"
                );
                DeliveryOutcome::Published { at: Utc::now() }
            }
            Ok(Err(err)) => self.failure(record, &err.to_string()),
            Err(_) => self.failure(
                record,
                &format!("send timed out after {:?}", self.config.send_timeout),
            ),
        }
    }

    fn failure(&self, record: &OutboxRecord, message: &str) -> DeliveryOutcome {
        let outcome = self
            .policy
            .failure_outcome(record.retry_count, message, Utc::now());
        match &outcome {
            DeliveryOutcome::Dead { retry_count, .. } => error!(
                event_id = %record.event_id,
                aggregate_id = %record.aggregate_id,
                retry_count = *retry_count,
                error = %message,
                "outbox event dead-lettered"
            ),
            DeliveryOutcome::Failed {
                retry_count,
                next_retry_at,
                ..
            } => warn!(
                event_id = %record.event_id,
                aggregate_id = %record.aggregate_id,
                retry_count = *retry_count,
                next_retry_at = %next_retry_at,
                error = %message,
                "outbox delivery failed"
            ),
            DeliveryOutcome::Published { .. } => {}
        }
        outcome
    }

    /// Run ticks every `poll_interval` on a tokio task.
    ///
    /// Missed ticks are skipped rather than bursted.
    pub fn spawn(self) -> PublisherHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                poll_interval_ms = self.config.poll_interval.as_millis() as u64,
                batch_size = self.config.batch_size,
                "outbox publisher started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        // A started tick always runs to completion (drain).
                        self.tick().await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            info!("outbox publisher stopped");
        });

        PublisherHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

/// Handle to a running publisher task.
#[derive(Debug)]
pub struct PublisherHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl PublisherHandle {
    /// Let the in-flight tick finish, then stop.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                warn!(error = %err, "outbox publisher task ended abnormally");
            }
        }
    }
}
