//! Strongly-typed identifiers used across the system.
//!
//! Domain entities (parts, materials, factories, ...) are keyed by the numeric
//! identifiers assigned by their owning services. Events are keyed by a random
//! UUID so that consumers can suppress duplicates without coordination.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Globally unique identifier of one emitted event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Create a fresh random identifier (UUIDv4).
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for EventId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for EventId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<EventId> for Uuid {
    fn from(value: EventId) -> Self {
        value.0
    }
}

impl FromStr for EventId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("EventId: {e}")))?;
        Ok(Self(uuid))
    }
}

macro_rules! impl_numeric_id {
    ($t:ident, $name:literal) => {
        #[doc = concat!("Identifier of a ", $name, ".")]
        #[derive(
            Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $t(pub i64);

        impl $t {
            pub fn new(value: i64) -> Self {
                Self(value)
            }

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<i64>()
                    .map(Self)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", stringify!($t), e)))
            }
        }
    };
}

impl_numeric_id!(OutboxId, "outbox row (insertion order)");
impl_numeric_id!(PartId, "part");
impl_numeric_id!(MaterialId, "material");
impl_numeric_id!(CategoryId, "part category");
impl_numeric_id!(FactoryId, "factory / branch");
impl_numeric_id!(BomId, "bill-of-materials header");
impl_numeric_id!(BomLineId, "bill-of-materials line");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_parse_and_display() {
        let id: PartId = "42".parse().unwrap();
        assert_eq!(id, PartId::new(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn numeric_id_rejects_garbage() {
        let err = "forty-two".parse::<MaterialId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(msg) if msg.starts_with("MaterialId")));
    }

    #[test]
    fn event_ids_are_random_and_roundtrip_through_strings() {
        let a = EventId::new();
        let b = EventId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<EventId>().unwrap(), a);
    }

    #[test]
    fn ids_serialize_transparently() {
        assert_eq!(serde_json::to_value(FactoryId::new(7)).unwrap(), serde_json::json!(7));
    }
}
