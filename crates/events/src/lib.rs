//! `mrp-events`: event transport mechanics (no storage, no business rules).
//!
//! - [`EventEnvelope`]: the wire shape every event travels in
//! - [`Transport`]: acknowledged, partition-keyed send contract
//! - [`InMemoryTransport`]: partitioned in-process transport for tests/dev
//! - [`projection`]: the generic idempotent-upsert decision protocol shared by
//!   every read-model synchronizer

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod projection;

pub use bus::{Delivery, Subscription, Transport, partition_for};
pub use envelope::EventEnvelope;
pub use event::{Event, EventKind};
pub use in_memory_bus::{InMemoryTransport, InMemoryTransportError};
pub use projection::{Decision, SkipReason, StreamPosition, SyncOutcome, decide};
