use mrp_core::EventId;

/// Projection apply/storage error.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// The payload does not match the entity's shape (poison message).
    #[error("cannot decode {entity} payload of event {event_id}: {source}")]
    Decode {
        entity: &'static str,
        event_id: EventId,
        #[source]
        source: serde_json::Error,
    },

    #[error("projection storage error: {0}")]
    Storage(String),

    /// Concurrent writers kept moving the row while this event was being applied.
    #[error("{entity} {id}: stored version kept changing after {attempts} attempts")]
    VersionConflict {
        entity: &'static str,
        id: String,
        attempts: usize,
    },
}

impl ProjectionError {
    /// Whether redelivering the same event may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProjectionError::Decode { .. } => false,
            ProjectionError::Storage(_) | ProjectionError::VersionConflict { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_decode_errors_are_permanent() {
        let decode = ProjectionError::Decode {
            entity: "Part",
            event_id: EventId::new(),
            source: serde_json::from_str::<i64>("x").unwrap_err(),
        };
        assert!(!decode.is_transient());
        assert!(ProjectionError::Storage("down".into()).is_transient());
    }
}
