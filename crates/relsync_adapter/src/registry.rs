//! Lazily built relational schema.

use crate::cache::{ModelSchema, RelationshipKind};
use crate::error::{AdapterError, AdapterResult};
use relsync_core::{classify, RelationDef, SchemaEntry};
use tracing::debug;

/// The schema entries registered so far, in registration order.
///
/// Entries are only ever appended, and there is at most one per singular
/// name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entries: Vec<SchemaEntry>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `model` and every model reachable through its relationships.
    ///
    /// `lookup` resolves related model names. Returns true if at least one
    /// entry was added. On error, entries added before the failing model
    /// stay registered.
    pub fn register<F>(
        &mut self,
        model: &ModelSchema,
        revision_attribute: &str,
        lookup: F,
    ) -> AdapterResult<bool>
    where
        F: Fn(&str) -> AdapterResult<ModelSchema>,
    {
        let before = self.entries.len();
        self.register_inner(model, revision_attribute, &lookup)?;
        Ok(self.entries.len() > before)
    }

    fn register_inner<F>(
        &mut self,
        model: &ModelSchema,
        revision_attribute: &str,
        lookup: &F,
    ) -> AdapterResult<()>
    where
        F: Fn(&str) -> AdapterResult<ModelSchema>,
    {
        if !model.has_attribute(revision_attribute) {
            return Err(AdapterError::MissingRevisionAttribute {
                model: classify(&model.name),
                attribute: revision_attribute.to_string(),
            });
        }
        if self.contains(&model.name) {
            return Ok(());
        }

        let mut entry = SchemaEntry::new(model.name.as_str());
        if let Some(plural) = &model.plural {
            entry = entry.with_plural(plural.as_str());
        }
        if let Some(document_type) = &model.document_type {
            entry = entry.with_document_type(document_type.as_str());
        }
        for rel in &model.relationships {
            let def = match rel.kind {
                RelationshipKind::ToOne => RelationDef::BelongsTo {
                    doc_type: rel.target.clone(),
                    options: rel.options.clone(),
                },
                RelationshipKind::ToMany => RelationDef::HasMany {
                    doc_type: rel.target.clone(),
                    options: rel.options.clone(),
                },
            };
            entry = entry.with_relation(rel.key.as_str(), def);
        }
        debug!(model = %model.name, plural = %entry.plural, "registering schema entry");
        self.entries.push(entry);

        for rel in &model.relationships {
            let target = lookup(&rel.target)?;
            self.register_inner(&target, revision_attribute, lookup)?;
        }
        Ok(())
    }

    /// Returns the entries.
    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    /// Returns the entry for `singular`, if registered.
    pub fn get(&self, singular: &str) -> Option<&SchemaEntry> {
        self.entries.iter().find(|e| e.singular == singular)
    }

    /// Returns the model name whose documents are keyed under
    /// `storage_type`.
    ///
    /// A model named exactly `storage_type` wins; otherwise the first model
    /// with a matching `document_type` override is returned.
    pub fn model_for_storage_type(&self, storage_type: &str) -> Option<&str> {
        self.get(storage_type)
            .filter(|e| e.storage_type() == storage_type)
            .or_else(|| self.entries.iter().find(|e| e.storage_type() == storage_type))
            .map(|e| e.singular.as_str())
    }

    /// Returns true if `singular` is registered.
    pub fn contains(&self, singular: &str) -> bool {
        self.get(singular).is_some()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
