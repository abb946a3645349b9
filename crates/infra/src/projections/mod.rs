//! Projections: local, soft-deletable read replicas of upstream entities.
//!
//! One generic protocol ([`ProjectionSynchronizer`]) applies inbound envelopes to a
//! [`ProjectionStore`]; each entity only supplies a [`ProjectionMapping`] describing
//! how an event payload becomes its business fields.

mod bom;
mod category;
mod dispatcher;
mod error;
mod factory;
mod mapping;
mod material;
mod part;
mod postgres;
mod record;
mod stock;
mod store;
mod synchronizer;

pub use bom::{BomFields, BomLineFields, BomLineMapping, BomMapping};
pub use category::{CategoryFields, CategoryMapping};
pub use dispatcher::{EnvelopeHandler, ProjectionDispatcher};
pub use error::ProjectionError;
pub use factory::{FactoryFields, FactoryMapping, FactoryProjection};
pub use mapping::ProjectionMapping;
pub use material::{MaterialFields, MaterialMapping};
pub use part::{PartFields, PartMapping};
pub use postgres::{PgFactoryStock, PgProjectionStore};
pub use record::ProjectionRecord;
pub use stock::{FactoryStockStore, InMemoryFactoryStock};
pub use store::{InMemoryProjectionStore, ProjectionStore};
pub use synchronizer::ProjectionSynchronizer;
