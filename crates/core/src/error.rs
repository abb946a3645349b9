//! Domain error model.

use thiserror::Error;

/// Domain-level error.
///
/// Only deterministic failures live here. Storage and transport failures have
/// their own error types in `mrp-infra`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_id_message_names_the_input() {
        let err = DomainError::invalid_id("PartId: invalid digit found in string");
        assert_eq!(
            err.to_string(),
            "invalid identifier: PartId: invalid digit found in string"
        );
    }
}
