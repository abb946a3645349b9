//! Catalog event families (pure data, no IO).
//!
//! Every family that feeds a projection emits the same three changes:
//! `<Entity>Created` / `<Entity>Updated` carry a full snapshot, `<Entity>Deleted`
//! carries only the id. Payloads are serialized camelCase and are exactly what
//! the projection mappings in `mrp-infra` decode.

#[macro_use]
mod family;

pub mod bom;
pub mod category;
pub mod factory;
pub mod material;
pub mod part;

pub use bom::{
    Bom, BomDeleted, BomEvent, BomLine, BomLineDeleted, BomLineEvent, BomStatus,
};
pub use category::{Category, CategoryDeleted, CategoryEvent};
pub use factory::{Factory, FactoryDeleted, FactoryEvent};
pub use material::{Material, MaterialDeleted, MaterialEvent};
pub use part::{Part, PartDeleted, PartEvent};
