//! Classifies change notifications.
//!
//! A notification is *managed* when its id decodes into a relational
//! `(type, natural id)` pair and the application knows the type. Everything
//! else is expected traffic in a shared store (design documents, documents
//! written by newer application versions) and is dropped without error.
//!
//! The decoded type is the storage type. Models registered with a
//! `document_type` override are mapped back to their model name through the
//! schema registry before the cache is consulted.

use crate::cache::ObjectCache;
use crate::registry::SchemaRegistry;
use parking_lot::RwLock;
use relsync_core::{ChangeNotification, DocumentId, RelationalStore};
use std::sync::Arc;
use tracing::trace;

/// A change that refers to a known model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedChange {
    /// Model name and natural id of the changed record.
    pub address: DocumentId,
    /// Whether the document was deleted.
    pub deleted: bool,
    /// Sequence number of the notification.
    pub seq: u64,
}

/// Why a notification was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The id is not a relational id.
    ForeignNamespace,
    /// The type is not registered with the application.
    UnknownModel,
}

/// Outcome of classifying one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The change should go to the reconciliation policy.
    Managed(ClassifiedChange),
    /// The change is dropped.
    Ignored(IgnoreReason),
}

/// Decodes notifications and filters out the ones the adapter does not manage.
pub struct ChangeClassifier<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
    registry: Arc<RwLock<SchemaRegistry>>,
}

impl<S: RelationalStore, C: ObjectCache> ChangeClassifier<S, C> {
    /// Creates a classifier with an empty schema registry.
    pub fn new(store: Arc<S>, cache: Arc<C>) -> Self {
        Self {
            store,
            cache,
            registry: Arc::new(RwLock::new(SchemaRegistry::new())),
        }
    }

    /// Resolves storage types through `registry`.
    pub fn with_registry(mut self, registry: Arc<RwLock<SchemaRegistry>>) -> Self {
        self.registry = registry;
        self
    }

    /// Classifies one notification.
    pub fn classify(&self, change: &ChangeNotification) -> Classification {
        let Some(address) = self
            .store
            .parse_doc_id(&change.id)
            .filter(|id| !id.doc_type.is_empty() && !id.natural_id.is_empty())
        else {
            trace!(id = %change.id, seq = change.seq, "ignoring non-relational document");
            return Classification::Ignored(IgnoreReason::ForeignNamespace);
        };

        let model = self
            .registry
            .read()
            .model_for_storage_type(&address.doc_type)
            .map(str::to_string);
        let address = match model {
            Some(model) if model != address.doc_type => {
                DocumentId::new(model, address.natural_id)
            }
            _ => address,
        };

        if self.cache.model_for(&address.doc_type).is_err() {
            trace!(
                doc_type = %address.doc_type,
                seq = change.seq,
                "ignoring change for unknown model"
            );
            return Classification::Ignored(IgnoreReason::UnknownModel);
        }

        Classification::Managed(ClassifiedChange {
            address,
            deleted: change.deleted,
            seq: change.seq,
        })
    }
}

impl<S, C> Clone for ChangeClassifier<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            registry: Arc::clone(&self.registry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryObjectCache, ModelSchema};
    use relsync_core::MemoryStore;

    fn classifier() -> ChangeClassifier<MemoryStore, MemoryObjectCache> {
        let cache = MemoryObjectCache::new();
        cache.register_model(ModelSchema::new("post").attribute("rev"));
        ChangeClassifier::new(Arc::new(MemoryStore::new()), Arc::new(cache))
    }

    #[test]
    fn known_model_is_managed() {
        let classification = classifier().classify(&ChangeNotification::deletion("post_2_7", 3));
        assert_eq!(
            classification,
            Classification::Managed(ClassifiedChange {
                address: DocumentId::new("post", "7"),
                deleted: true,
                seq: 3,
            })
        );
    }

    #[test]
    fn design_documents_are_ignored() {
        let classifier = classifier();
        for id in ["_design/relational", "_local/abc", "plain", "post_2_"] {
            assert_eq!(
                classifier.classify(&ChangeNotification::update(id, 1)),
                Classification::Ignored(IgnoreReason::ForeignNamespace),
                "{id}"
            );
        }
    }

    #[test]
    fn document_type_override_resolves_to_model() {
        let person = ModelSchema::new("person")
            .attribute("rev")
            .with_document_type("user");
        let cache = MemoryObjectCache::new();
        cache.register_model(person.clone());

        let registry = Arc::new(RwLock::new(SchemaRegistry::new()));
        registry
            .write()
            .register(&person, "rev", |_: &str| Ok(person.clone()))
            .unwrap();
        let classifier = ChangeClassifier::new(Arc::new(MemoryStore::new()), Arc::new(cache))
            .with_registry(registry);

        assert_eq!(
            classifier.classify(&ChangeNotification::update("user_2_1", 4)),
            Classification::Managed(ClassifiedChange {
                address: DocumentId::new("person", "1"),
                deleted: false,
                seq: 4,
            })
        );
        // No storage type maps to "person", so the name is looked up as-is.
        assert_eq!(
            classifier.classify(&ChangeNotification::update("person_2_1", 5)),
            Classification::Managed(ClassifiedChange {
                address: DocumentId::new("person", "1"),
                deleted: false,
                seq: 5,
            })
        );
    }

    #[test]
    fn unknown_models_are_ignored() {
        let classification = classifier().classify(&ChangeNotification::update("widget_2_1", 1));
        assert_eq!(
            classification,
            Classification::Ignored(IgnoreReason::UnknownModel)
        );
    }
}
