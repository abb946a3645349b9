//! Infrastructure transports.
//!
//! The transport contract and the in-memory implementation live in `mrp-events`;
//! this module provides the broker-backed ones.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsConsumer, RedisStreamsError, RedisStreamsTransport};
