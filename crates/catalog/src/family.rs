/// Generates the `<Entity>Event` enum of a catalog family and its `Event` impl.
///
/// The enum serializes untagged: the envelope carries the type name, the payload is
/// just the snapshot (or the deletion marker).
macro_rules! event_family {
    (
        $(#[$meta:meta])*
        $event:ident, $entity:literal, $snapshot:ty, $deleted:ty, $id_field:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize)]
        #[serde(untagged)]
        pub enum $event {
            Created($snapshot),
            Updated($snapshot),
            Deleted($deleted),
        }

        impl $event {
            /// Entity family name, the prefix of every event type in this family.
            pub const ENTITY: &'static str = $entity;

            pub fn kind(&self) -> mrp_events::EventKind {
                match self {
                    Self::Created(_) => mrp_events::EventKind::Created,
                    Self::Updated(_) => mrp_events::EventKind::Updated,
                    Self::Deleted(_) => mrp_events::EventKind::Deleted,
                }
            }
        }

        impl mrp_events::Event for $event {
            fn event_type(&self) -> &'static str {
                match self {
                    Self::Created(_) => concat!($entity, "Created"),
                    Self::Updated(_) => concat!($entity, "Updated"),
                    Self::Deleted(_) => concat!($entity, "Deleted"),
                }
            }

            fn aggregate_id(&self) -> String {
                match self {
                    Self::Created(s) | Self::Updated(s) => s.$id_field.to_string(),
                    Self::Deleted(d) => d.$id_field.to_string(),
                }
            }
        }
    };
}
