//! In-memory partitioned transport for tests/dev.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::{Delivery, Subscription, Transport, partition_for};
use crate::EventEnvelope;

#[derive(Debug, thiserror::Error)]
pub enum InMemoryTransportError {
    /// The transport was switched offline (simulated broker outage).
    #[error("transport unavailable")]
    Unavailable,

    /// A one-shot injected failure.
    #[error("injected send failure")]
    Injected,

    /// Internal lock poisoning.
    #[error("transport lock poisoned")]
    Poisoned,
}

/// In-memory pub/sub transport.
///
/// - Keys map to partitions with [`partition_for`]; every partition keeps send order
/// - Every accepted send is recorded (see [`InMemoryTransport::sent`])
/// - Failures can be injected to exercise the publisher's retry path
#[derive(Debug)]
pub struct InMemoryTransport {
    partitions: usize,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Delivery>>>,
    log: Mutex<Vec<Delivery>>,
    available: AtomicBool,
    fail_next: AtomicU32,
}

impl InMemoryTransport {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            subscribers: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            fail_next: AtomicU32::new(0),
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Simulate a broker outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `n` sends, then behave normally.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// All accepted deliveries in acceptance order.
    pub fn sent(&self) -> Vec<Delivery> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Accepted deliveries of one partition, in partition order.
    pub fn sent_to_partition(&self, partition: usize) -> Vec<Delivery> {
        self.sent()
            .into_iter()
            .filter(|d| d.partition == partition)
            .collect()
    }

    pub fn subscribe(&self) -> Subscription<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();

        // A poisoned lock still yields a subscription; it just stays silent.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    type Error = InMemoryTransportError;

    async fn send(&self, key: &str, envelope: &EventEnvelope) -> Result<(), Self::Error> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(InMemoryTransportError::Unavailable);
        }
        if self.take_injected_failure() {
            return Err(InMemoryTransportError::Injected);
        }

        let delivery = Delivery {
            key: key.to_string(),
            partition: partition_for(key, self.partitions),
            envelope: envelope.clone(),
        };

        // Log and fan out under the same lock so every subscriber sees log order.
        let mut log = self.log.lock().map_err(|_| InMemoryTransportError::Poisoned)?;
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| InMemoryTransportError::Poisoned)?;

        // Drop any dead subscribers while publishing.
        subs.retain(|tx| tx.send(delivery.clone()).is_ok());
        log.push(delivery);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mrp_core::EventId;
    use serde_json::json;

    fn envelope(version: i64) -> EventEnvelope {
        EventEnvelope::new(EventId::new(), "PartUpdated", version, Utc::now(), json!({"partId": 1}))
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber_in_order() {
        let transport = InMemoryTransport::new(4);
        let mut a = transport.subscribe();
        let mut b = transport.subscribe();

        transport.send("1", &envelope(1)).await.unwrap();
        transport.send("1", &envelope(2)).await.unwrap();

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await.unwrap().envelope.version(), 1);
            assert_eq!(sub.recv().await.unwrap().envelope.version(), 2);
        }
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn same_key_always_lands_in_same_partition() {
        let transport = InMemoryTransport::new(8);
        for v in 1..=5 {
            transport.send("42", &envelope(v)).await.unwrap();
        }
        let partition = partition_for("42", 8);
        let versions: Vec<_> = transport
            .sent_to_partition(partition)
            .iter()
            .map(|d| d.envelope.version())
            .collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_one_per_send() {
        let transport = InMemoryTransport::default();
        transport.fail_next(2);

        assert!(matches!(
            transport.send("1", &envelope(1)).await,
            Err(InMemoryTransportError::Injected)
        ));
        assert!(transport.send("1", &envelope(1)).await.is_err());
        assert!(transport.send("1", &envelope(1)).await.is_ok());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn outage_rejects_until_recovered() {
        let transport = InMemoryTransport::default();
        transport.set_available(false);
        assert!(matches!(
            transport.send("1", &envelope(1)).await,
            Err(InMemoryTransportError::Unavailable)
        ));
        transport.set_available(true);
        assert!(transport.send("1", &envelope(1)).await.is_ok());
    }
}
