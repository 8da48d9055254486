//! Error types for the store crate.
//!
//! Constraint violations reported by the database are classified into
//! domain errors so callers can tell an idempotent duplicate or a missing
//! group apart from an opaque driver failure.

use std::fmt;

/// Membership store errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No row matched the lookup.
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Key that was looked up.
        key: String,
    },
    /// A unique constraint rejected the write.
    DuplicateKey {
        /// Kind of record.
        entity: &'static str,
        /// Key that already exists.
        key: String,
    },
    /// The write references a group that does not exist.
    ForeignKeyViolation {
        /// Kind of record.
        entity: &'static str,
        /// Key whose reference is dangling.
        key: String,
    },
    /// A stored value could not be decoded.
    InvalidData {
        /// Error details.
        details: String,
    },
    /// Any other database failure.
    Database {
        /// Error details.
        details: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, key } => write!(f, "{} '{}' not found", entity, key),
            Self::DuplicateKey { entity, key } => write!(f, "{} '{}' already exists", entity, key),
            Self::ForeignKeyViolation { entity, key } => {
                write!(
                    f,
                    "{} '{}' references a group that does not exist",
                    entity, key
                )
            }
            Self::InvalidData { details } => write!(f, "invalid stored data: {}", details),
            Self::Database { details } => write!(f, "database error: {}", details),
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    /// Returns true for a duplicate insert.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// Returns true when no row matched.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_display() {
        let err = StoreError::DuplicateKey {
            entity: "group member",
            key: "grp_1/alice".to_string(),
        };
        assert_eq!(err.to_string(), "group member 'grp_1/alice' already exists");
        assert!(err.is_duplicate());
        assert!(!err.is_not_found());
    }

    #[test]
    fn foreign_key_display_names_missing_group() {
        let err = StoreError::ForeignKeyViolation {
            entity: "allowed application",
            key: "grp_1/app".to_string(),
        };
        assert!(err.to_string().contains("group that does not exist"));
    }
}
