use serde::Serialize;

/// A typed domain event that can be recorded in the outbox.
///
/// Events are facts: immutable, serialized once at enqueue time and never patched.
/// The serialized form of `self` becomes the envelope `payload`; when the change
/// happened travels on the envelope, not in the payload.
pub trait Event: Serialize + Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Symbolic change name, `<Entity><Kind>` (e.g. `"PartCreated"`).
    fn event_type(&self) -> &'static str;

    /// Identifier of the entity the event concerns (transport partition key).
    fn aggregate_id(&self) -> String;
}

/// The three change kinds every entity family emits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "Created",
            EventKind::Updated => "Updated",
            EventKind::Deleted => "Deleted",
        }
    }

    /// Parse an event type for the given entity family.
    ///
    /// Accepts the qualified form (`"PartUpdated"` for entity `"Part"`) and the bare
    /// kind (`"Updated"`). Anything else (another entity's events, kinds added by newer
    /// producers) yields `None`.
    pub fn parse(entity: &str, event_type: &str) -> Option<Self> {
        let kind = event_type.strip_prefix(entity).unwrap_or(event_type);
        match kind {
            "Created" => Some(EventKind::Created),
            "Updated" => Some(EventKind::Updated),
            "Deleted" => Some(EventKind::Deleted),
            _ => None,
        }
    }

    /// Build the qualified event type name for an entity family.
    pub fn qualified(self, entity: &str) -> String {
        format!("{entity}{}", self.as_str())
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_qualified_and_bare_kinds() {
        assert_eq!(EventKind::parse("Part", "PartCreated"), Some(EventKind::Created));
        assert_eq!(EventKind::parse("Part", "Deleted"), Some(EventKind::Deleted));
        assert_eq!(EventKind::parse("BomLine", "BomLineUpdated"), Some(EventKind::Updated));
    }

    #[test]
    fn rejects_unknown_kinds() {
        assert_eq!(EventKind::parse("Part", "PartArchived"), None);
        assert_eq!(EventKind::parse("Part", "MaterialCreatedLater"), None);
        assert_eq!(EventKind::parse("Part", ""), None);
    }

    #[test]
    fn qualified_names_roundtrip() {
        let name = EventKind::Deleted.qualified("Factory");
        assert_eq!(name, "FactoryDeleted");
        assert_eq!(EventKind::parse("Factory", &name), Some(EventKind::Deleted));
    }
}
