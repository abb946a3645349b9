use mrp_core::EventId;

use super::OutboxStatus;

/// Outbox storage / write-path error.
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    /// The event could not be serialized. Fatal to the enclosing transaction.
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("event {0} is already recorded in the outbox")]
    DuplicateEvent(EventId),

    #[error("outbox event not found: {0}")]
    NotFound(EventId),

    #[error("event {event_id} cannot move from {from} to {to}")]
    InvalidTransition {
        event_id: EventId,
        from: OutboxStatus,
        to: OutboxStatus,
    },

    #[error("outbox storage error: {0}")]
    Storage(String),

    #[error("outbox state lock poisoned")]
    Poisoned,
}
