//! Error types for the adapter.

use crate::cache::CacheError;
use relsync_core::StoreError;
use thiserror::Error;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors that can occur in adapter operations.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// The adapter was built without a store.
    #[error("please set the `store` property on the adapter")]
    MissingStore,

    /// The adapter was built without an object cache.
    #[error("please set the `cache` property on the adapter")]
    MissingCache,

    /// A model lacks the attribute that carries the document revision.
    #[error("please add a `{attribute}` attribute of type `string` on the {model} model")]
    MissingRevisionAttribute {
        /// Class-style model name.
        model: String,
        /// Name of the revision attribute.
        attribute: String,
    },

    /// A singular fetch found no record.
    #[error("not found: type \"{model}\" with id \"{id}\"")]
    NotFound {
        /// Model name.
        model: String,
        /// Requested id.
        id: String,
    },

    /// The operation is not supported by this adapter.
    #[error("{0} is not supported")]
    Unsupported(&'static str),

    /// `start` was called on an adapter that has already been started.
    #[error("adapter has already been started")]
    AlreadyStarted,

    /// `start` was called outside a tokio runtime.
    #[error("start must be called from within a tokio runtime")]
    NoRuntime,

    /// Error from the document store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error from the object cache.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

impl AdapterError {
    /// Returns true if this error reports a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdapterError::NotFound { .. })
    }

    /// Returns true if this error reports a setup mistake that retrying
    /// will not fix.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AdapterError::MissingStore
                | AdapterError::MissingCache
                | AdapterError::MissingRevisionAttribute { .. }
                | AdapterError::AlreadyStarted
                | AdapterError::NoRuntime
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        let not_found = AdapterError::NotFound {
            model: "post".into(),
            id: "1".into(),
        };
        assert!(not_found.is_not_found());
        assert!(!not_found.is_configuration());

        assert!(AdapterError::MissingStore.is_configuration());
        assert!(AdapterError::NoRuntime.is_configuration());
        assert!(!AdapterError::Unsupported("findQuery").is_not_found());
    }

    #[test]
    fn error_display() {
        let err = AdapterError::NotFound {
            model: "post".into(),
            id: "1".into(),
        };
        assert_eq!(err.to_string(), "not found: type \"post\" with id \"1\"");

        let err = AdapterError::MissingRevisionAttribute {
            model: "BlogPost".into(),
            attribute: "rev".into(),
        };
        assert!(err.to_string().contains("`rev`"));
        assert!(err.to_string().contains("BlogPost"));

        let err = AdapterError::from(StoreError::DocumentNotFound {
            doc_id: "post_2_1".into(),
        });
        assert_eq!(err.to_string(), "store error: document not found: post_2_1");
    }
}
