//! Error types for the Roost engine.

use crate::schema::Issues;
use crate::{CollectionName, ResourceId};
use thiserror::Error;

/// All possible errors from the Roost engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Eventstamp errors
    #[error("invalid eventstamp: {0}")]
    InvalidEventstamp(String),

    // Resource errors
    #[error("resource data must be an object")]
    NotAnObject,

    #[error("resource type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    // Collection errors
    #[error("resource already exists: {0}")]
    DuplicateId(ResourceId),

    #[error("resource not found: {0}")]
    NotFound(ResourceId),

    #[error("value has no id")]
    MissingId,

    #[error("unknown collection: {0}")]
    UnknownCollection(CollectionName),

    #[error("validation failed: {0}")]
    Validation(Issues),

    // Document errors
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    // Plugin errors, constructed by plugin implementations and bubbled verbatim
    #[error("plugin '{name}' failed: {message}")]
    Plugin { name: String, message: String },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Issue;

    #[test]
    fn error_display() {
        let err = Error::NotFound("task-1".into());
        assert_eq!(err.to_string(), "resource not found: task-1");

        let err = Error::TypeMismatch {
            expected: "users".into(),
            got: "tasks".into(),
        };
        assert_eq!(
            err.to_string(),
            "resource type mismatch: expected users, got tasks"
        );

        let err = Error::Validation(Issues(vec![Issue {
            message: "missing required field".into(),
            path: Some("name".into()),
        }]));
        assert_eq!(
            err.to_string(),
            "validation failed: name: missing required field"
        );
    }
}
