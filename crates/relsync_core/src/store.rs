//! The relational store contract.

use crate::change_feed::{ChangeSubscription, ChangesOptions};
use crate::doc_id::DocumentId;
use crate::error::StoreResult;
use crate::payload::{DeleteResult, Payload, SaveResult};
use crate::schema::SchemaEntry;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A document store with a relational mapping layer and a change feed.
///
/// Finds return [`Payload`]s keyed by the plural type name. Writes take the
/// document data as a JSON object that carries `id` and, for updates and
/// deletes, the current `rev`.
///
/// This trait abstracts the backing database, allowing for different
/// implementations (replicating document databases, in-memory for testing).
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Opens a change subscription.
    fn changes(&self, options: &ChangesOptions) -> StoreResult<ChangeSubscription>;

    /// Replaces the relational schema.
    fn set_schema(&self, schema: &[SchemaEntry]) -> StoreResult<()>;

    /// Decodes a storage key into a `(type, natural id)` pair.
    ///
    /// Returns `None` for keys outside the relational namespace.
    fn parse_doc_id(&self, key: &str) -> Option<DocumentId> {
        DocumentId::parse(key)
    }

    /// Encodes a `(type, natural id)` pair into a storage key.
    fn make_doc_id(&self, doc_type: &str, natural_id: &str) -> String {
        DocumentId::new(doc_type, natural_id).encode()
    }

    /// Finds every document of a type.
    async fn find_all(&self, doc_type: &str) -> StoreResult<Payload>;

    /// Finds the documents of a type with the given ids. Missing ids are skipped.
    async fn find_many(&self, doc_type: &str, ids: &[String]) -> StoreResult<Payload>;

    /// Finds one document. A missing document yields an empty payload.
    async fn find_one(&self, doc_type: &str, id: &str) -> StoreResult<Payload>;

    /// Creates or updates a document.
    async fn save(&self, doc_type: &str, data: Map<String, Value>) -> StoreResult<SaveResult>;

    /// Deletes a document.
    async fn delete(&self, doc_type: &str, data: &Map<String, Value>) -> StoreResult<DeleteResult>;
}
