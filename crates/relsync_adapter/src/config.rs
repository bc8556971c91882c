//! Configuration for the adapter.

use relsync_core::{ChangesOptions, REV_FIELD};

/// Configuration for an [`Adapter`](crate::Adapter).
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Options for the change subscription opened by `start`.
    pub changes: ChangesOptions,
    /// Attribute every model must declare to carry the document revision.
    pub revision_attribute: String,
    /// Hint for the host cache: batch single-record lookups into `find_many`.
    pub coalesce_find_requests: bool,
}

impl AdapterConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            changes: ChangesOptions::live_from_now(),
            revision_attribute: REV_FIELD.to_string(),
            coalesce_find_requests: true,
        }
    }

    /// Sets the change subscription options.
    pub fn with_changes(mut self, changes: ChangesOptions) -> Self {
        self.changes = changes;
        self
    }

    /// Sets the revision attribute name.
    pub fn with_revision_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.revision_attribute = attribute.into();
        self
    }

    /// Sets whether finds should be coalesced.
    pub fn with_coalesce_find_requests(mut self, coalesce: bool) -> Self {
        self.coalesce_find_requests = coalesce;
        self
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relsync_core::Since;

    #[test]
    fn defaults_follow_live_changes() {
        let config = AdapterConfig::default();
        assert_eq!(config.changes.since, Since::Now);
        assert!(config.changes.live);
        assert!(!config.changes.include_docs);
        assert_eq!(config.revision_attribute, "rev");
        assert!(config.coalesce_find_requests);
    }

    #[test]
    fn config_builder() {
        let config = AdapterConfig::new()
            .with_changes(ChangesOptions::live_from_now().with_include_docs(true))
            .with_revision_attribute("_rev")
            .with_coalesce_find_requests(false);

        assert!(config.changes.include_docs);
        assert_eq!(config.revision_attribute, "_rev");
        assert!(!config.coalesce_find_requests);
    }
}
