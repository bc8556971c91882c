//! The object cache bridge.
//!
//! The adapter never owns cached objects. It looks them up, reads their
//! loaded/dirty state and asks the cache to unload or reload them. Model
//! descriptors also come from the cache, since the consuming application
//! owns its type registry.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use relsync_core::{DocumentId, RelationOptions};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors reported by an object cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The application has no model with this name.
    #[error("no model was found for '{model}'")]
    UnknownModel {
        /// Model name that was looked up.
        model: String,
    },

    /// Reloading a record failed.
    #[error("failed to reload {address}: {message}")]
    Reload {
        /// Address of the record.
        address: DocumentId,
        /// Error message.
        message: String,
    },
}

/// Cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipKind {
    /// The field references one record.
    ToOne,
    /// The field references many records.
    ToMany,
}

/// A statically declared relationship on a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Field name on the owning model.
    pub key: String,
    /// Cardinality.
    pub kind: RelationshipKind,
    /// Related model name.
    pub target: String,
    /// Relationship options.
    #[serde(default)]
    pub options: RelationOptions,
}

/// Descriptor of one application model.
///
/// Hosts that keep their model registry in configuration can deserialize
/// descriptors directly:
///
/// ```json
/// { "name": "post", "attributes": ["rev", "title"],
///   "relationships": [{ "key": "author", "kind": "toOne", "target": "author" }] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSchema {
    /// Model name (the document type), e.g. `blog-post`.
    pub name: String,
    /// Attribute names.
    #[serde(default)]
    pub attributes: Vec<String>,
    /// Relationships to other models.
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    /// Plural override for payload keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plural: Option<String>,
    /// Stores documents of this model under another type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
}

impl ModelSchema {
    /// Creates a model descriptor with no attributes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
            plural: None,
            document_type: None,
        }
    }

    /// Adds an attribute.
    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(name.into());
        self
    }

    /// Adds a to-one relationship.
    pub fn belongs_to(self, key: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(key, RelationshipKind::ToOne, target, RelationOptions::default())
    }

    /// Adds a to-many relationship.
    pub fn has_many(self, key: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(key, RelationshipKind::ToMany, target, RelationOptions::default())
    }

    /// Adds a relationship with explicit options.
    pub fn relationship(
        mut self,
        key: impl Into<String>,
        kind: RelationshipKind,
        target: impl Into<String>,
        options: RelationOptions,
    ) -> Self {
        self.relationships.push(Relationship {
            key: key.into(),
            kind,
            target: target.into(),
            options,
        });
        self
    }

    /// Sets the plural payload key.
    pub fn with_plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = Some(plural.into());
        self
    }

    /// Stores documents under another type.
    pub fn with_document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }

    /// Returns true if the model declares `name` as an attribute.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a == name)
    }
}

/// A record resident in the object cache.
pub trait CachedRecord {
    /// `(type, natural id)` of the record.
    fn address(&self) -> DocumentId;

    /// Whether the record has received its initial data.
    fn is_loaded(&self) -> bool;

    /// Whether the record has local edits that are not saved.
    fn is_dirty(&self) -> bool;
}

/// The object cache the adapter keeps in sync.
pub trait ObjectCache: Send + Sync + 'static {
    /// Handle to a cached record. Cloning must be cheap.
    type Record: CachedRecord + Clone + Send + Sync + 'static;

    /// Looks up a registered model by name.
    fn model_for(&self, model: &str) -> CacheResult<ModelSchema>;

    /// Returns the resident record at `(model, id)`, without loading it.
    fn peek_record(&self, model: &str, id: &str) -> Option<Self::Record>;

    /// Removes a record from the cache.
    fn unload_record(&self, record: &Self::Record);

    /// Starts refetching a record. The returned future completes when the
    /// reload does; callers may drop it into a background task.
    fn reload_record(&self, record: &Self::Record) -> BoxFuture<'static, CacheResult<()>>;
}

/// Fetches fresh data for a record. `None` means the backing document is gone.
pub type RecordLoader = Arc<
    dyn Fn(DocumentId) -> BoxFuture<'static, CacheResult<Option<Map<String, Value>>>> + Send + Sync,
>;

/// A call made against [`MemoryObjectCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheCall {
    /// `unload_record` was called.
    Unload(DocumentId),
    /// `reload_record` was called.
    Reload(DocumentId),
}

#[derive(Debug)]
struct RecordInner {
    address: DocumentId,
    loaded: AtomicBool,
    dirty: AtomicBool,
    data: RwLock<Map<String, Value>>,
}

/// A record held by [`MemoryObjectCache`].
#[derive(Debug, Clone)]
pub struct MemoryRecord(Arc<RecordInner>);

impl MemoryRecord {
    /// Creates a record that has not loaded yet.
    pub fn new(model: impl Into<String>, id: impl Into<String>) -> Self {
        Self(Arc::new(RecordInner {
            address: DocumentId::new(model, id),
            loaded: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            data: RwLock::new(Map::new()),
        }))
    }

    /// Creates a loaded, clean record with `data`.
    pub fn loaded(model: impl Into<String>, id: impl Into<String>, data: Map<String, Value>) -> Self {
        let record = Self::new(model, id);
        record.set_data(data);
        record
    }

    /// Replaces the record data and marks it loaded and clean.
    pub fn set_data(&self, data: Map<String, Value>) {
        *self.0.data.write() = data;
        self.0.loaded.store(true, Ordering::SeqCst);
        self.0.dirty.store(false, Ordering::SeqCst);
    }

    /// Returns a copy of the record data.
    pub fn data(&self) -> Map<String, Value> {
        self.0.data.read().clone()
    }

    /// Edits one attribute locally, marking the record dirty.
    pub fn set_attribute(&self, key: impl Into<String>, value: Value) {
        self.0.data.write().insert(key.into(), value);
        self.0.dirty.store(true, Ordering::SeqCst);
    }

    /// Sets the dirty flag.
    pub fn set_dirty(&self, dirty: bool) {
        self.0.dirty.store(dirty, Ordering::SeqCst);
    }
}

impl CachedRecord for MemoryRecord {
    fn address(&self) -> DocumentId {
        self.0.address.clone()
    }

    fn is_loaded(&self) -> bool {
        self.0.loaded.load(Ordering::SeqCst)
    }

    fn is_dirty(&self) -> bool {
        self.0.dirty.load(Ordering::SeqCst)
    }
}

/// Number of calls [`MemoryObjectCache`] keeps by default.
pub const DEFAULT_CALL_LOG_LIMIT: usize = 1024;

/// An in-memory object cache, intended for tests and small embedded hosts.
///
/// Keeps a log of the most recent unload and reload requests; once the log
/// holds `call_limit` entries the oldest is dropped. An optional
/// [`RecordLoader`] supplies fresh data on reload; without one, reloads
/// complete immediately and leave the data untouched.
pub struct MemoryObjectCache {
    models: RwLock<HashMap<String, ModelSchema>>,
    records: RwLock<HashMap<DocumentId, MemoryRecord>>,
    calls: Mutex<VecDeque<CacheCall>>,
    call_limit: usize,
    loader: RwLock<Option<RecordLoader>>,
}

impl MemoryObjectCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::with_call_limit(DEFAULT_CALL_LOG_LIMIT)
    }

    /// Creates an empty cache whose call log keeps at most `limit` entries.
    pub fn with_call_limit(limit: usize) -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
            calls: Mutex::new(VecDeque::new()),
            call_limit: limit,
            loader: RwLock::new(None),
        }
    }

    /// Registers an application model.
    pub fn register_model(&self, model: ModelSchema) {
        self.models.write().insert(model.name.clone(), model);
    }

    /// Sets the loader used by reloads.
    pub fn set_loader<F, Fut>(&self, loader: F)
    where
        F: Fn(DocumentId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheResult<Option<Map<String, Value>>>> + Send + 'static,
    {
        let loader: RecordLoader = Arc::new(move |address: DocumentId| loader(address).boxed());
        *self.loader.write() = Some(loader);
    }

    /// Makes a record resident.
    pub fn insert(&self, record: MemoryRecord) -> MemoryRecord {
        self.records
            .write()
            .insert(record.address(), record.clone());
        record
    }

    /// Returns the resident record at `(model, id)`.
    pub fn get(&self, model: &str, id: &str) -> Option<MemoryRecord> {
        self.records
            .read()
            .get(&DocumentId::new(model, id))
            .cloned()
    }

    /// Returns the number of resident records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no record is resident.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns the logged calls, oldest first.
    pub fn calls(&self) -> Vec<CacheCall> {
        self.calls.lock().iter().cloned().collect()
    }

    /// Empties the call log.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn log_call(&self, call: CacheCall) {
        if self.call_limit == 0 {
            return;
        }
        let mut calls = self.calls.lock();
        while calls.len() >= self.call_limit {
            calls.pop_front();
        }
        calls.push_back(call);
    }

    /// Returns the number of logged reload requests.
    pub fn reload_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, CacheCall::Reload(_)))
            .count()
    }

    /// Returns the number of logged unload requests.
    pub fn unload_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, CacheCall::Unload(_)))
            .count()
    }
}

impl Default for MemoryObjectCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryObjectCache")
            .field("models", &self.models.read().len())
            .field("records", &self.records.read().len())
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

impl ObjectCache for MemoryObjectCache {
    type Record = MemoryRecord;

    fn model_for(&self, model: &str) -> CacheResult<ModelSchema> {
        self.models
            .read()
            .get(model)
            .cloned()
            .ok_or_else(|| CacheError::UnknownModel {
                model: model.to_string(),
            })
    }

    fn peek_record(&self, model: &str, id: &str) -> Option<MemoryRecord> {
        self.get(model, id)
    }

    fn unload_record(&self, record: &MemoryRecord) {
        let address = record.address();
        self.log_call(CacheCall::Unload(address.clone()));
        self.records.write().remove(&address);
    }

    fn reload_record(&self, record: &MemoryRecord) -> BoxFuture<'static, CacheResult<()>> {
        let address = record.address();
        self.log_call(CacheCall::Reload(address.clone()));

        let loader = self.loader.read().clone();
        let record = record.clone();
        Box::pin(async move {
            let Some(loader) = loader else {
                return Ok(());
            };
            match loader(address.clone()).await? {
                Some(data) => {
                    record.set_data(data);
                    Ok(())
                }
                None => Err(CacheError::Reload {
                    address,
                    message: "record no longer exists".into(),
                }),
            }
        })
    }
}
