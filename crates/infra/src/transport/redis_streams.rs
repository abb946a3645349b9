//! Redis Streams transport (durable, at-least-once delivery).
//!
//! ## Layout
//!
//! - **Streams**: `<prefix>:<n>` for `n` in `0..partitions`; an aggregate always lands
//!   on the stream chosen by [`partition_for`] over its key, so per-aggregate order holds
//! - **Entries**: `key`, `eventType` and `payload` (the envelope JSON)
//! - **Consumer groups**: one per consuming service; each entry goes to one consumer
//!
//! ## Consumer protocol
//!
//! 1. Re-read this consumer's own pending entries (`XREADGROUP ... 0`) of a stream
//!    until none remain; on start every stream is read this way
//! 2. Take new entries (`XREADGROUP ... >`) on streams that are caught up, blocking only
//!    when all of them are
//! 3. `XACK` after a successful apply, or after a permanent failure (poison payload)
//! 4. A transient failure leaves the entry and the rest of its stream's batch pending;
//!    the consumer backs off and goes back to step 1 for that stream only

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use mrp_events::{EventEnvelope, SyncOutcome, Transport, partition_for};

use crate::projections::{ProjectionDispatcher, ProjectionError};
use crate::workers::WorkerHandle;

/// Entries fetched per `XREADGROUP`.
const DEFAULT_BATCH: usize = 64;

/// How long a read for new entries blocks before returning empty.
const DEFAULT_BLOCK: Duration = Duration::from_secs(2);

/// Pause after a transient failure before re-reading pending entries.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stream name for one partition.
pub fn stream_key(prefix: &str, partition: usize) -> String {
    format!("{prefix}:{partition}")
}

/// Producer side: `XADD` to the partition stream, awaited for the server's ack.
#[derive(Clone)]
pub struct RedisStreamsTransport {
    conn: MultiplexedConnection,
    prefix: String,
    partitions: usize,
}

impl core::fmt::Debug for RedisStreamsTransport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStreamsTransport")
            .field("prefix", &self.prefix)
            .field("partitions", &self.partitions)
            .finish()
    }
}

impl RedisStreamsTransport {
    pub async fn connect(
        redis_url: &str,
        prefix: impl Into<String>,
        partitions: usize,
    ) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
            partitions: partitions.max(1),
        })
    }

    pub fn stream_for(&self, key: &str) -> String {
        stream_key(&self.prefix, partition_for(key, self.partitions))
    }
}

#[async_trait]
impl Transport for RedisStreamsTransport {
    type Error = RedisStreamsError;

    #[instrument(
        skip(self, envelope),
        fields(event_id = %envelope.event_id(), event_type = %envelope.event_type()),
        err
    )]
    async fn send(&self, key: &str, envelope: &EventEnvelope) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(envelope)?;
        let stream = self.stream_for(key);
        let mut conn = self.conn.clone();
        let _entry_id: String = conn
            .xadd(
                &stream,
                "*",
                &[
                    ("key", key),
                    ("eventType", envelope.event_type()),
                    ("payload", payload.as_str()),
                ],
            )
            .await?;
        Ok(())
    }
}

/// Consumer side: one named member of a consumer group over every partition stream.
pub struct RedisStreamsConsumer {
    conn: MultiplexedConnection,
    streams: Vec<String>,
    group: String,
    consumer: String,
    batch: usize,
    block: Duration,
    retry_delay: Duration,
}

impl core::fmt::Debug for RedisStreamsConsumer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStreamsConsumer")
            .field("streams", &self.streams)
            .field("group", &self.group)
            .field("consumer", &self.consumer)
            .finish()
    }
}

/// One entry read through the consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    stream: String,
    id: String,
    payload: Option<String>,
}

/// What happens to an entry once it has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryAction {
    Ack,
    /// Can never apply; acknowledged and discarded.
    AckPoison,
    /// May apply on redelivery; it and the rest of its stream stay pending.
    Stall,
}

impl EntryAction {
    fn of(handled: &Result<SyncOutcome, ProjectionError>) -> Self {
        match handled {
            Ok(_) => EntryAction::Ack,
            Err(err) if err.is_transient() => EntryAction::Stall,
            Err(_) => EntryAction::AckPoison,
        }
    }
}

/// Entries to acknowledge and streams left pending after one batch.
#[derive(Debug, Default, PartialEq, Eq)]
struct BatchPlan {
    ack: Vec<Entry>,
    stalled: Vec<String>,
}

/// Handle a batch in stream order. Entries behind a stalled one on the same stream
/// are not handled, so they are retried in order.
async fn plan_batch<F, Fut>(batch: Vec<Entry>, mut handle: F) -> BatchPlan
where
    F: FnMut(EventEnvelope) -> Fut,
    Fut: Future<Output = Result<SyncOutcome, ProjectionError>>,
{
    let mut plan = BatchPlan::default();

    for entry in batch {
        if plan.stalled.contains(&entry.stream) {
            continue;
        }

        let envelope = match entry.payload.as_deref().map(serde_json::from_str::<EventEnvelope>) {
            Some(Ok(envelope)) => envelope,
            Some(Err(err)) => {
                error!(stream = %entry.stream, entry_id = %entry.id, error = %err, "undecodable envelope; acknowledged");
                plan.ack.push(entry);
                continue;
            }
            None => {
                warn!(stream = %entry.stream, entry_id = %entry.id, "entry without payload; acknowledged");
                plan.ack.push(entry);
                continue;
            }
        };

        let event_id = envelope.event_id();
        let event_type = envelope.event_type().to_string();
        let handled = handle(envelope).await;
        let action = EntryAction::of(&handled);

        match &handled {
            Ok(SyncOutcome::Skipped(_)) => {}
            Ok(outcome) => debug!(
                event_id = %event_id,
                event_type = %event_type,
                outcome = outcome.label(),
                "projection updated"
            ),
            Err(err) if action == EntryAction::Stall => warn!(
                stream = %entry.stream,
                event_id = %event_id,
                error = %err,
                "transient projection failure; left pending"
            ),
            Err(err) => error!(
                stream = %entry.stream,
                event_id = %event_id,
                event_type = %event_type,
                error = %err,
                "poison event; acknowledged and discarded"
            ),
        }

        if action == EntryAction::Stall {
            plan.stalled.push(entry.stream);
        } else {
            plan.ack.push(entry);
        }
    }

    plan
}

/// Per-stream read position: `0` re-reads this consumer's own pending entries,
/// `>` takes new ones.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Backlog {
    pending: Vec<bool>,
}

impl Backlog {
    /// Every stream may hold unacknowledged entries after a restart.
    fn all(streams: usize) -> Self {
        Self {
            pending: vec![true; streams],
        }
    }

    fn read_ids(&self) -> Vec<&'static str> {
        self.pending
            .iter()
            .map(|&pending| if pending { "0" } else { ">" })
            .collect()
    }

    /// A read that includes pending history returns at once; block only when every
    /// stream is caught up.
    fn block(&self, block: Duration) -> Option<Duration> {
        if self.pending.iter().any(|&pending| pending) {
            None
        } else {
            Some(block)
        }
    }

    /// A pending stream that returned nothing is caught up.
    fn after_read(&mut self, streams: &[String], batch: &[Entry]) {
        for (stream, pending) in streams.iter().zip(self.pending.iter_mut()) {
            if *pending && !batch.iter().any(|e| &e.stream == stream) {
                *pending = false;
            }
        }
    }

    fn stall(&mut self, streams: &[String], stalled: &[String]) {
        for (stream, pending) in streams.iter().zip(self.pending.iter_mut()) {
            if stalled.contains(stream) {
                *pending = true;
            }
        }
    }

    fn reset(&mut self) {
        self.pending.fill(true);
    }
}

impl RedisStreamsConsumer {
    /// Connect with a dedicated connection (blocking reads would stall a shared one)
    /// and make sure the group exists on every partition stream.
    pub async fn connect(
        redis_url: &str,
        prefix: &str,
        partitions: usize,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let mut this = Self {
            conn,
            streams: (0..partitions.max(1)).map(|p| stream_key(prefix, p)).collect(),
            group: group.into(),
            consumer: consumer.into(),
            batch: DEFAULT_BATCH,
            block: DEFAULT_BLOCK,
            retry_delay: DEFAULT_RETRY_DELAY,
        };
        this.ensure_groups().await?;
        Ok(this)
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Create the group on each stream (idempotent).
    pub async fn ensure_groups(&mut self) -> Result<(), RedisStreamsError> {
        for stream in &self.streams {
            let created: redis::RedisResult<()> = self
                .conn
                .xgroup_create_mkstream(stream, &self.group, "0")
                .await;
            match created {
                Ok(()) => info!(stream = %stream, group = %self.group, "consumer group created"),
                Err(err) if err.code() == Some("BUSYGROUP") => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Read one batch across all streams, each from its backlog position.
    async fn read(&mut self, backlog: &Backlog) -> Result<Vec<Entry>, RedisStreamsError> {
        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.batch);
        if let Some(block) = backlog.block(self.block) {
            options = options.block(block.as_millis() as usize);
        }
        let ids = backlog.read_ids();

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(self.streams.as_slice(), ids.as_slice(), &options)
            .await?;

        Ok(reply
            .map(|r| {
                r.keys
                    .into_iter()
                    .flat_map(|k| {
                        let stream = k.key;
                        k.ids.into_iter().map(move |entry| Entry {
                            stream: stream.clone(),
                            payload: entry.get::<String>("payload"),
                            id: entry.id,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ack(&mut self, stream: &str, id: &str) -> Result<(), RedisStreamsError> {
        let _: usize = self.conn.xack(stream, &self.group, &[id]).await?;
        Ok(())
    }

    /// Apply a batch and acknowledge what is done with. Returns the streams left pending.
    async fn apply_batch(
        &mut self,
        dispatcher: &ProjectionDispatcher,
        batch: Vec<Entry>,
    ) -> Result<Vec<String>, RedisStreamsError> {
        let plan = plan_batch(batch, move |envelope| async move {
            dispatcher.dispatch(&envelope).await
        })
        .await;

        for entry in &plan.ack {
            self.ack(&entry.stream, &entry.id).await?;
        }
        debug!(acked = plan.ack.len(), stalled = plan.stalled.len(), "batch applied");
        Ok(plan.stalled)
    }

    /// Consume on a tokio task until shutdown.
    pub fn spawn(mut self, dispatcher: Arc<ProjectionDispatcher>) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let span = info_span!("redis_consumer", group = %self.group, consumer = %self.consumer);

        let join = tokio::spawn(
            async move {
                info!(streams = self.streams.len(), "redis streams consumer started");
                let mut backlog = Backlog::all(self.streams.len());
                loop {
                    let read = tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => break,
                        read = self.read(&backlog) => read,
                    };

                    let backoff = match read {
                        Ok(batch) if batch.is_empty() => {
                            backlog.after_read(&self.streams, &batch);
                            false
                        }
                        Ok(batch) => {
                            backlog.after_read(&self.streams, &batch);
                            match self.apply_batch(&dispatcher, batch).await {
                                Ok(stalled) => {
                                    backlog.stall(&self.streams, &stalled);
                                    !stalled.is_empty()
                                }
                                Err(err) => {
                                    error!(error = %err, "acknowledgement failed");
                                    backlog.reset();
                                    true
                                }
                            }
                        }
                        Err(err) => {
                            error!(error = %err, "stream read failed");
                            backlog.reset();
                            true
                        }
                    };

                    if backoff {
                        tokio::select! {
                            biased;
                            _ = shutdown_rx.changed() => break,
                            _ = tokio::time::sleep(self.retry_delay) => {}
                        }
                    }
                }
                info!("redis streams consumer stopped");
            }
            .instrument(span),
        );

        WorkerHandle::new(shutdown_tx, join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mrp_core::EventId;
    use mrp_events::SkipReason;
    use serde_json::json;

    #[test]
    fn stream_names_follow_partition() {
        assert_eq!(stream_key("mrp:events", 3), "mrp:events:3");
        let p = partition_for("42", 8);
        assert_eq!(stream_key("mrp:events", p), format!("mrp:events:{p}"));
    }

    fn entry(stream: &str, id: &str, envelope: &EventEnvelope) -> Entry {
        Entry {
            stream: stream.into(),
            id: id.into(),
            payload: Some(serde_json::to_string(envelope).unwrap()),
        }
    }

    fn envelope() -> EventEnvelope {
        EventEnvelope::new(
            EventId::new(),
            "PartCreated",
            1,
            Utc::now(),
            json!({"partId": 42, "code": "P-42", "name": "A", "unitOfMeasure": "pcs"}),
        )
    }

    fn decode_error(event_id: EventId) -> ProjectionError {
        ProjectionError::Decode {
            entity: "Part",
            event_id,
            source: serde_json::from_str::<i64>("x").unwrap_err(),
        }
    }

    fn streams() -> Vec<String> {
        vec![stream_key("mrp:events", 0), stream_key("mrp:events", 1)]
    }

    #[test]
    fn only_transient_failures_stall() {
        assert_eq!(EntryAction::of(&Ok(SyncOutcome::Inserted)), EntryAction::Ack);
        assert_eq!(
            EntryAction::of(&Ok(SyncOutcome::Skipped(SkipReason::Duplicate))),
            EntryAction::Ack
        );
        assert_eq!(
            EntryAction::of(&Err(decode_error(EventId::new()))),
            EntryAction::AckPoison
        );
        assert_eq!(
            EntryAction::of(&Err(ProjectionError::Storage("down".into()))),
            EntryAction::Stall
        );
    }

    #[tokio::test]
    async fn poison_entries_are_acknowledged() {
        let poison = envelope();
        let batch = vec![
            Entry {
                stream: "mrp:events:0".into(),
                id: "1-0".into(),
                payload: Some("not json".into()),
            },
            Entry {
                stream: "mrp:events:0".into(),
                id: "2-0".into(),
                payload: None,
            },
            entry("mrp:events:0", "3-0", &poison),
        ];

        let plan = plan_batch(batch, |env| {
            let result = Err(decode_error(env.event_id()));
            async move { result }
        })
        .await;

        let acked: Vec<_> = plan.ack.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(acked, ["1-0", "2-0", "3-0"]);
        assert!(plan.stalled.is_empty());
    }

    #[tokio::test]
    async fn transient_failure_holds_back_the_rest_of_its_stream() {
        let (e1, e2, e3, e4) = (envelope(), envelope(), envelope(), envelope());
        let failing = e2.event_id();
        let batch = vec![
            entry("mrp:events:0", "1-0", &e1),
            entry("mrp:events:0", "2-0", &e2),
            entry("mrp:events:0", "3-0", &e3),
            entry("mrp:events:1", "1-0", &e4),
        ];

        let mut handled = Vec::new();
        let plan = plan_batch(batch, |env| {
            handled.push(env.event_id());
            let result = if env.event_id() == failing {
                Err(ProjectionError::Storage("connection reset".into()))
            } else {
                Ok(SyncOutcome::Inserted)
            };
            async move { result }
        })
        .await;

        assert_eq!(handled, [e1.event_id(), e2.event_id(), e4.event_id()]);
        let acked: Vec<_> = plan
            .ack
            .iter()
            .map(|e| (e.stream.as_str(), e.id.as_str()))
            .collect();
        assert_eq!(acked, [("mrp:events:0", "1-0"), ("mrp:events:1", "1-0")]);
        assert_eq!(plan.stalled, ["mrp:events:0"]);
    }

    #[test]
    fn restart_reads_pending_entries_first() {
        let streams = streams();
        let mut backlog = Backlog::all(streams.len());
        assert_eq!(backlog.read_ids(), ["0", "0"]);
        assert_eq!(backlog.block(Duration::from_secs(2)), None);

        // Stream 1 still returns history; stream 0 is drained.
        let leftover = entry(&streams[1], "5-0", &envelope());
        backlog.after_read(&streams, &[leftover]);
        assert_eq!(backlog.read_ids(), [">", "0"]);
        assert_eq!(backlog.block(Duration::from_secs(2)), None);

        backlog.after_read(&streams, &[]);
        assert_eq!(backlog.read_ids(), [">", ">"]);
        assert_eq!(
            backlog.block(Duration::from_secs(2)),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn only_stalled_streams_are_reread_from_history() {
        let streams = streams();
        let mut backlog = Backlog::all(streams.len());
        backlog.after_read(&streams, &[]);

        backlog.stall(&streams, &[streams[1].clone()]);
        assert_eq!(backlog.read_ids(), [">", "0"]);

        // New entries on the healthy stream do not put it back into history mode.
        let fresh = entry(&streams[0], "9-0", &envelope());
        backlog.after_read(&streams, &[fresh]);
        assert_eq!(backlog.read_ids(), [">", "0"]);

        backlog.reset();
        assert_eq!(backlog.read_ids(), ["0", "0"]);
    }

    #[test]
    fn redis_errors_convert() {
        let err: RedisStreamsError =
            redis::RedisError::from((redis::ErrorKind::IoError, "connection refused")).into();
        assert!(err.to_string().contains("connection refused"));
    }
}
