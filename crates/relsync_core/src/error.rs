//! Error types for relsync core.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in relational store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No schema entry is registered for the document type.
    #[error("unknown document type: {doc_type}")]
    UnknownType {
        /// The type that was looked up.
        doc_type: String,
    },

    /// Document does not exist (or has been deleted).
    #[error("document not found: {doc_id}")]
    DocumentNotFound {
        /// Encoded document identifier.
        doc_id: String,
    },

    /// The revision supplied with a write is not the current one.
    #[error("document update conflict on {doc_id}: expected revision {expected:?}, got {actual:?}")]
    Conflict {
        /// Encoded document identifier.
        doc_id: String,
        /// Current revision in the store.
        expected: Option<String>,
        /// Revision supplied by the caller.
        actual: Option<String>,
    },

    /// Document data is not shaped the way the store expects.
    #[error("invalid document: {message}")]
    InvalidDocument {
        /// Description of the problem.
        message: String,
    },
}

impl StoreError {
    /// Creates an invalid document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Returns true if this error reports a revision conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::UnknownType {
            doc_type: "post".into(),
        };
        assert_eq!(err.to_string(), "unknown document type: post");

        let err = StoreError::Conflict {
            doc_id: "post_2_1".into(),
            expected: Some("2-abc".into()),
            actual: Some("1-def".into()),
        };
        assert!(err.to_string().contains("post_2_1"));
        assert!(err.is_conflict());
        assert!(!StoreError::invalid_document("no id").is_conflict());
    }
}
