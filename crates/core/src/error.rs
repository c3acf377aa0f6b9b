//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic failures only (bad input, broken invariants, uniqueness
/// conflicts). Storage outages and step failures have their own types in the
/// crates that own those boundaries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested record does not exist.
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    /// A uniqueness rule was violated (duplicate slug, email, membership, ...).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_entity() {
        let err = DomainError::not_found("organization");
        assert_eq!(err.to_string(), "organization not found");
    }

    #[test]
    fn conflict_keeps_message() {
        let err = DomainError::conflict("slug 'acme' already taken");
        assert!(matches!(err, DomainError::Conflict(ref m) if m.contains("acme")));
    }
}
