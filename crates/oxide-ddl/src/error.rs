//! Error types for schema modeling and reconciliation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad family an [`ErrorKind`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Invalid or duplicate names, wrong object type, missing object.
    Structural,
    /// References to removed objects, disallowed scopes, shape mismatches.
    Referential,
    /// Model state forbids the operation.
    State,
}

/// Specific validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Name is empty, too long, contains control characters or is reserved.
    NameInvalid,
    /// Name is already taken in the owning namespace.
    NameConflict,
    /// Handle does not resolve to an object.
    ObjectNotFound,
    /// Default value has no SQL literal (non-finite float).
    InvalidDefault,
    /// Target object has been removed.
    ObjectRemoved,
    /// Object is not owned by the expected parent.
    ForeignReference,
    /// A referenced object has been removed.
    ReferencedObjectRemoved,
    /// Reference crosses a scope the dialect cannot express.
    CrossScopeReference,
    /// Foreign key references a non-unique index.
    IndexNotUnique,
    /// Foreign key columns do not match the referenced index.
    ColumnShapeMismatch,
    /// Object is still referenced from outside its scope.
    ExternallyReferenced,
    /// Table rendered in commit mode has no primary key.
    MissingPrimaryKey,
    /// Dialect cannot express the requested mutation.
    UnsupportedMutation,
}

impl ErrorKind {
    /// Returns the category of this error kind.
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::NameInvalid
            | Self::NameConflict
            | Self::ObjectNotFound
            | Self::InvalidDefault
            | Self::ForeignReference => ErrorCategory::Structural,
            Self::ReferencedObjectRemoved
            | Self::CrossScopeReference
            | Self::IndexNotUnique
            | Self::ColumnShapeMismatch => ErrorCategory::Referential,
            Self::ObjectRemoved
            | Self::ExternallyReferenced
            | Self::MissingPrimaryKey
            | Self::UnsupportedMutation => ErrorCategory::State,
        }
    }
}

/// One validation failure: what went wrong and on which object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Failure kind.
    pub kind: ErrorKind,
    /// Display name of the offending object.
    pub object: String,
    /// Human readable detail.
    pub message: String,
}

impl ErrorEntry {
    /// Creates a new error entry.
    pub fn new(kind: ErrorKind, object: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            object: object.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} on '{}': {}", self.kind, self.object, self.message)
    }
}

/// Errors raised by the object model and the reconciliation engine.
#[derive(Debug, thiserror::Error)]
pub enum DdlError {
    /// One or more validation failures, tagged with the dialect in use.
    #[error("Validation failed for dialect '{dialect}':\n{}", .errors.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n"))]
    Validation {
        /// Name of the dialect the model targets.
        dialect: &'static str,
        /// Every failure found.
        errors: Vec<ErrorEntry>,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DdlError {
    /// Builds a validation error carrying a single entry.
    pub fn single(
        dialect: &'static str,
        kind: ErrorKind,
        object: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            dialect,
            errors: vec![ErrorEntry::new(kind, object, message)],
        }
    }

    /// Returns the validation entries, empty for non-validation errors.
    #[must_use]
    pub fn entries(&self) -> &[ErrorEntry] {
        match self {
            Self::Validation { errors, .. } => errors,
            Self::Serialization(_) => &[],
        }
    }

    /// Returns whether any entry has the given kind.
    #[must_use]
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.entries().iter().any(|e| e.kind == kind)
    }
}

/// Result type for schema operations.
pub type Result<T> = std::result::Result<T, DdlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(ErrorKind::NameConflict.category(), ErrorCategory::Structural);
        assert_eq!(ErrorKind::InvalidDefault.category(), ErrorCategory::Structural);
        assert_eq!(ErrorKind::IndexNotUnique.category(), ErrorCategory::Referential);
        assert_eq!(ErrorKind::MissingPrimaryKey.category(), ErrorCategory::State);
        assert_eq!(ErrorKind::ObjectRemoved.category(), ErrorCategory::State);
    }

    #[test]
    fn test_validation_display_lists_entries() {
        let err = DdlError::Validation {
            dialect: "sqlite",
            errors: vec![
                ErrorEntry::new(ErrorKind::MissingPrimaryKey, "main.users", "no primary key"),
                ErrorEntry::new(ErrorKind::NameConflict, "main.posts", "name taken"),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("sqlite"));
        assert!(text.contains("main.users"));
        assert!(text.contains("main.posts"));
        assert!(err.has_kind(ErrorKind::NameConflict));
        assert!(!err.has_kind(ErrorKind::ObjectRemoved));
    }
}
