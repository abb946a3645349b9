//! `mrp-core`: shared primitives for the MRP change-propagation backbone.
//!
//! This crate contains **pure** building blocks (no infrastructure concerns):
//! typed identifiers and the domain error model.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{BomId, BomLineId, CategoryId, EventId, FactoryId, MaterialId, OutboxId, PartId};
