use core::fmt::{Debug, Display};
use core::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;

use mrp_events::EventEnvelope;

/// Per-entity part of the projection protocol.
///
/// Everything else (duplicate/stale guards, dispatch on kind, soft delete,
/// compare-and-set persistence) is shared by [`super::ProjectionSynchronizer`].
pub trait ProjectionMapping: Debug + Clone + PartialEq + Send + Sync + 'static {
    /// Event-type prefix of the family (`"Part"` for `PartCreated`, ...).
    const ENTITY: &'static str;
    /// Backing table of the Postgres store.
    const TABLE: &'static str;
    /// Primary-key column of [`Self::TABLE`].
    const ID_COLUMN: &'static str;
    /// Payload field carrying the entity id.
    const ID_FIELD: &'static str;

    type Id: Copy
        + Eq
        + Ord
        + Hash
        + Debug
        + Display
        + From<i64>
        + Into<i64>
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Denormalized business fields, replaced wholesale on every accepted event.
    type Fields: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    fn id_of(envelope: &EventEnvelope) -> Result<Self::Id, serde_json::Error> {
        envelope.payload_field(Self::ID_FIELD)
    }

    /// Business fields from a Created/Updated payload.
    fn fields_from(envelope: &EventEnvelope) -> Result<Self::Fields, serde_json::Error>;
}
