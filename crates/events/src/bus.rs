//! Event transport abstraction (mechanics only).
//!
//! The transport sits between the outbox publisher and projection synchronizers:
//!
//! ```text
//! mutation + outbox row (one tx) → publisher tick → Transport::send → consumers
//!                                                                      └─ projection synchronizers
//! ```
//!
//! ## Delivery guarantees
//!
//! - **Acknowledged sends**: `send()` resolves only once the transport has accepted the
//!   event (or failed). The publisher needs that answer before it finalizes a row.
//! - **Per-key ordering**: events sent with the same partition key land in the same
//!   ordered partition. Nothing is promised across keys.
//! - **At-least-once**: a row may be sent again after a crash between send and commit,
//!   so consumers must be idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::EventEnvelope;

/// One event as seen by a consumer: the partition key it was sent under plus the envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub key: String,
    pub partition: usize,
    pub envelope: EventEnvelope,
}

/// Acknowledgement-awaited, partition-keyed event transport.
///
/// Implementations must be safe to share across tasks (`Send + Sync`). Timeouts are
/// applied by the caller; an implementation that can hang forever is still correct
/// as long as dropping the future abandons the attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: core::fmt::Display + core::fmt::Debug + Send + Sync + 'static;

    /// Send one event keyed by `key` (the aggregate id) and wait for the acknowledgement.
    async fn send(&self, key: &str, envelope: &EventEnvelope) -> Result<(), Self::Error>;
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    type Error = T::Error;

    async fn send(&self, key: &str, envelope: &EventEnvelope) -> Result<(), Self::Error> {
        (**self).send(key, envelope).await
    }
}

/// Stable partition assignment for a key (FNV-1a over the key bytes).
///
/// Stable across processes and restarts, so every producer maps an aggregate to the
/// same partition.
pub fn partition_for(key: &str, partitions: usize) -> usize {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    if partitions <= 1 {
        return 0;
    }
    let hash = key
        .bytes()
        .fold(OFFSET, |acc, b| (acc ^ u64::from(b)).wrapping_mul(PRIME));
    (hash % partitions as u64) as usize
}

/// A subscription to a transport's deliveries.
///
/// Each subscription receives its own copy of every delivery (broadcast semantics),
/// in send order per partition.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: mpsc::UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: mpsc::UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<M, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}
