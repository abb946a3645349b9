//! Infrastructure layer: outbox, projections, transports, storage.
//!
//! - [`outbox`]: transactional write path, publisher, retry policy, stores
//! - [`projections`]: the generic idempotent synchronizer and per-entity mappings
//! - [`workers`]: background consumers applying delivered envelopes
//! - [`transport`]: broker-backed [`mrp_events::Transport`] implementations
//! - [`config`]: environment-driven configuration
//! - [`migrations`]: SQL schema

pub mod config;
pub mod migrations;
pub mod outbox;
pub mod projections;
pub mod transport;
pub mod workers;


pub use config::{AppConfig, ConfigError, PublisherConfig};
