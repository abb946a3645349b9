//! Operational binary surface: runtime wiring plus a small admin HTTP API for
//! outbox health and dead-letter handling.

pub mod app;
