//! Test fixtures and adapter helpers.
//!
//! Provides a blog-shaped model set, an adapter wired to an in-memory store
//! and cache, and helpers that act as a remote replica writing to the store.

use relsync_adapter::{
    Adapter, AdapterConfig, MemoryObjectCache, MemoryRecord, ModelSchema, RecordSnapshot,
};
use relsync_core::{
    DeleteResult, DocumentId, MemoryStore, RelationalStore, SaveResult, ID_FIELD, REV_FIELD,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Converts a JSON object literal into a map.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Models for a small blog: posts with an author and comments.
pub fn blog_models() -> Vec<ModelSchema> {
    vec![
        ModelSchema::new("post")
            .attribute("rev")
            .attribute("title")
            .attribute("body")
            .belongs_to("author", "author")
            .has_many("comments", "comment"),
        ModelSchema::new("author")
            .attribute("rev")
            .attribute("name")
            .has_many("posts", "post"),
        ModelSchema::new("comment")
            .attribute("rev")
            .attribute("text")
            .belongs_to("post", "post"),
    ]
}

/// Creates a cache with [`blog_models`] registered.
pub fn blog_cache() -> MemoryObjectCache {
    let cache = MemoryObjectCache::new();
    for model in blog_models() {
        cache.register_model(model);
    }
    cache
}

/// The concrete adapter type used by tests.
pub type MemoryAdapter = Adapter<MemoryStore, MemoryObjectCache>;

/// An adapter over an in-memory store and cache.
///
/// Reloads read the current document from the store, so a remote write
/// followed by a reload leaves the cached record equal to the stored one.
pub struct TestAdapter {
    /// The store shared by the adapter and the "remote" helpers.
    pub store: Arc<MemoryStore>,
    /// The object cache.
    pub cache: Arc<MemoryObjectCache>,
    /// The adapter under test.
    pub adapter: MemoryAdapter,
}

impl TestAdapter {
    /// Creates an adapter with the blog models and default configuration.
    pub fn new() -> Self {
        Self::with_config(AdapterConfig::default())
    }

    /// Creates an adapter with the blog models and `config`.
    pub fn with_config(config: AdapterConfig) -> Self {
        Self::with_cache(blog_cache(), config)
    }

    /// Creates an adapter over `cache`.
    pub fn with_cache(cache: MemoryObjectCache, config: AdapterConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(cache);

        let loader_store = Arc::clone(&store);
        cache.set_loader(move |address: DocumentId| {
            let store = Arc::clone(&loader_store);
            async move { Ok(store.document(&address.doc_type, &address.natural_id)) }
        });

        let adapter = Adapter::builder()
            .store(Arc::clone(&store))
            .cache(Arc::clone(&cache))
            .config(config)
            .build()
            .expect("store and cache are set");

        Self {
            store,
            cache,
            adapter,
        }
    }

    /// Creates an adapter and starts its listener.
    ///
    /// Must be called from within a tokio runtime.
    pub fn started() -> Self {
        let fixture = Self::new();
        fixture.adapter.start().expect("fresh adapter starts");
        fixture
    }

    /// Saves a document as another replica would, bypassing the cache.
    pub async fn remote_save(&self, model: &str, data: Value) -> SaveResult {
        self.adapter
            .ensure_registered(model)
            .expect("model is registered with the cache");
        self.store
            .save(model, object(data))
            .await
            .expect("remote save succeeds")
    }

    /// Updates a stored document as another replica would.
    pub async fn remote_update(&self, model: &str, id: &str, mut changes: Map<String, Value>) -> SaveResult {
        let mut data = self
            .store
            .document(model, id)
            .expect("document exists before a remote update");
        data.append(&mut changes);
        self.store
            .save(model, data)
            .await
            .expect("remote update succeeds")
    }

    /// Deletes a stored document as another replica would.
    pub async fn remote_delete(&self, model: &str, id: &str) -> DeleteResult {
        let current = self
            .store
            .document(model, id)
            .expect("document exists before a remote delete");
        let mut data = Map::new();
        data.insert(ID_FIELD.into(), Value::String(id.to_string()));
        if let Some(rev) = current.get(REV_FIELD) {
            data.insert(REV_FIELD.into(), rev.clone());
        }
        self.store
            .delete(model, &data)
            .await
            .expect("remote delete succeeds")
    }

    /// Makes the stored document resident in the cache as a loaded, clean
    /// record.
    pub fn load_record(&self, model: &str, id: &str) -> MemoryRecord {
        let data = self
            .store
            .document(model, id)
            .expect("document exists before loading");
        self.cache.insert(MemoryRecord::loaded(model, id, data))
    }

    /// Builds a snapshot of the resident record, as the host would before a
    /// save.
    pub fn snapshot(&self, model: &str, id: &str) -> RecordSnapshot {
        let record = self.cache.get(model, id).expect("record is resident");
        let mut attributes = record.data();
        attributes.remove(ID_FIELD);
        RecordSnapshot::new(attributes).with_id(id)
    }

    /// Waits until the listener has received `count` notifications.
    ///
    /// # Panics
    ///
    /// Panics after five seconds.
    pub async fn wait_for_received(&self, count: u64) {
        wait_until(Duration::from_secs(5), || self.adapter.stats().received >= count).await;
    }
}

impl Default for TestAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestAdapter {
    type Target = MemoryAdapter;

    fn deref(&self) -> &Self::Target {
        &self.adapter
    }
}

/// Polls `condition` until it holds.
///
/// # Panics
///
/// Panics if `condition` does not hold within `timeout`.
pub async fn wait_until<F>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let polled = tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not met within {timeout:?}");
}
