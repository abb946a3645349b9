//! Transactional outbox.
//!
//! Write path: [`enqueuer`] inserts a READY row through an [`OutboxWriter`] bound to
//! the caller's transaction, so the row commits or rolls back with the mutation.
//!
//! Read path: [`OutboxPublisher`] claims due rows (skip-locked), sends each one with an
//! acknowledged [`mrp_events::Transport`] call and records PUBLISHED / FAILED / DEAD.
//! All retry state lives on the row.

pub mod enqueuer;
mod error;
mod in_memory;
mod postgres;
pub mod publisher;
mod record;
mod retry;
mod store;

pub use enqueuer::{enqueue, enqueue_event, enqueue_next};
pub use error::OutboxError;
pub use in_memory::{InMemoryClaim, InMemoryOutboxStore, InMemoryTransaction};
pub use postgres::{PgClaim, PgOutboxStore};
pub use publisher::{OutboxPublisher, PublisherHandle, TickReport};
pub use record::{DeliveryOutcome, NewOutboxRecord, OutboxRecord, OutboxStatus, truncate_error};
pub use retry::RetryPolicy;
pub use store::{OutboxClaim, OutboxStore, OutboxWriter, StatusCounts};
