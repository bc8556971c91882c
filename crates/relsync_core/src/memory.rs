//! In-memory relational store.

use crate::change_feed::{ChangeFeed, ChangeNotification, ChangeSubscription, ChangesOptions};
use crate::doc_id::{type_prefix, DocumentId};
use crate::error::{StoreError, StoreResult};
use crate::payload::{DeleteResult, Payload, Revision, SaveResult, ID_FIELD, REV_FIELD};
use crate::schema::{RelationDef, SchemaEntry};
use crate::store::RelationalStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// Number of hex characters kept from the body digest in a revision.
const REV_DIGEST_LEN: usize = 32;

/// Configuration for [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Number of change notifications kept for replay.
    pub max_history: usize,
}

impl MemoryStoreConfig {
    /// Sets the replay history limit.
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_history: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredDocument {
    rev: Revision,
    body: Map<String, Value>,
    deleted: bool,
}

#[derive(Debug, Default)]
struct State {
    docs: BTreeMap<String, StoredDocument>,
    seq: u64,
}

/// A relational store that keeps every document in memory.
///
/// This store is suitable for:
/// - Unit and integration tests
/// - Ephemeral caches that don't need persistence
///
/// Documents are keyed by encoded [`DocumentId`]s, revisions follow the
/// `<generation>-<digest>` scheme, and every write is published on the
/// change feed while the write lock is held, so feed order matches
/// sequence order.
///
/// # Example
///
/// ```rust
/// use relsync_core::{MemoryStore, RelationalStore, SchemaEntry};
/// use serde_json::json;
///
/// # tokio_test_block(async {
/// let store = MemoryStore::new();
/// store.set_schema(&[SchemaEntry::new("post")]).unwrap();
///
/// let data = json!({"id": "1", "title": "hello"});
/// let saved = store.save("post", data.as_object().unwrap().clone()).await.unwrap();
/// assert_eq!(saved.id, "1");
///
/// let payload = store.find_one("post", "1").await.unwrap();
/// assert_eq!(payload.records("posts").len(), 1);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct MemoryStore {
    state: RwLock<State>,
    schema: RwLock<Vec<SchemaEntry>>,
    feed: ChangeFeed,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    /// Creates an empty store with the given configuration.
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            state: RwLock::new(State::default()),
            schema: RwLock::new(Vec::new()),
            feed: ChangeFeed::with_max_history(config.max_history),
        }
    }

    /// Returns the current schema.
    pub fn schema(&self) -> Vec<SchemaEntry> {
        self.schema.read().clone()
    }

    /// Returns the latest assigned sequence number.
    pub fn update_seq(&self) -> u64 {
        self.state.read().seq
    }

    /// Returns the number of live (non-deleted) documents, including raw ones.
    pub fn doc_count(&self) -> usize {
        self.state.read().docs.values().filter(|d| !d.deleted).count()
    }

    /// Returns the change feed.
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Closes the change feed. Open subscriptions end once drained.
    pub fn close(&self) {
        self.feed.close();
    }

    /// Writes a document under an arbitrary key, outside the relational
    /// namespace rules. Used for design documents and foreign data.
    pub fn put_raw(&self, key: &str, body: Map<String, Value>) -> Revision {
        let mut state = self.state.write();
        let generation = state
            .docs
            .get(key)
            .and_then(|d| d.rev.generation())
            .unwrap_or(0);
        let rev = make_revision(generation + 1, &body);
        self.commit(&mut state, key, rev.clone(), body, false);
        rev
    }

    /// Returns the stored data of a managed document, with `id` and `rev`.
    ///
    /// `doc_type` is the model name; documents of a type with a
    /// `document_type` override are looked up under that override.
    pub fn document(&self, doc_type: &str, natural_id: &str) -> Option<Map<String, Value>> {
        let storage_type = match self.entry(doc_type) {
            Ok(entry) => entry.storage_type().to_string(),
            Err(_) => doc_type.to_string(),
        };
        let key = DocumentId::new(storage_type, natural_id).encode();
        let state = self.state.read();
        let doc = state.docs.get(&key).filter(|d| !d.deleted)?;
        Some(to_record(natural_id, doc))
    }

    fn entry(&self, doc_type: &str) -> StoreResult<SchemaEntry> {
        self.schema
            .read()
            .iter()
            .find(|entry| entry.singular == doc_type)
            .cloned()
            .ok_or_else(|| StoreError::UnknownType {
                doc_type: doc_type.to_string(),
            })
    }

    fn commit(
        &self,
        state: &mut State,
        key: &str,
        rev: Revision,
        body: Map<String, Value>,
        deleted: bool,
    ) {
        state.seq += 1;
        let seq = state.seq;

        let mut doc = body.clone();
        doc.insert("_id".into(), Value::String(key.to_string()));
        doc.insert("_rev".into(), Value::String(rev.to_string()));
        if deleted {
            doc.insert("_deleted".into(), Value::Bool(true));
        }

        state.docs.insert(
            key.to_string(),
            StoredDocument {
                rev,
                body,
                deleted,
            },
        );

        let change = if deleted {
            ChangeNotification::deletion(key, seq)
        } else {
            ChangeNotification::update(key, seq)
        };
        self.feed.emit(change.with_doc(Value::Object(doc)));
    }

    /// Collects the records for `ids` into a payload, then sideloads the
    /// relations that are not lazily loaded.
    fn collect(&self, entry: &SchemaEntry, ids: Option<&[String]>) -> StoreResult<Payload> {
        let state = self.state.read();
        let mut payload = Payload::new();
        payload.ensure_key(&entry.plural);

        let storage_type = entry.storage_type();
        let mut primary = Vec::new();
        match ids {
            Some(ids) => {
                for id in ids {
                    let key = DocumentId::new(storage_type, id.as_str()).encode();
                    if let Some(doc) = state.docs.get(&key).filter(|d| !d.deleted) {
                        primary.push(to_record(id, doc));
                    }
                }
            }
            None => {
                let prefix = type_prefix(storage_type);
                for (key, doc) in state.docs.range(prefix.clone()..) {
                    if !key.starts_with(&prefix) {
                        break;
                    }
                    if doc.deleted {
                        continue;
                    }
                    if let Some(id) = DocumentId::parse(key) {
                        primary.push(to_record(&id.natural_id, doc));
                    }
                }
            }
        }

        for record in &primary {
            for (field, relation) in &entry.relations {
                if relation.options().is_async {
                    continue;
                }
                let Ok(related) = self.entry(relation.doc_type()) else {
                    continue;
                };
                for related_id in related_ids(relation, record.get(field)) {
                    let key = DocumentId::new(related.storage_type(), related_id.as_str()).encode();
                    if let Some(doc) = state.docs.get(&key).filter(|d| !d.deleted) {
                        payload.push_unique(&related.plural, Value::Object(to_record(&related_id, doc)));
                    }
                }
            }
        }

        for record in primary {
            payload.push_unique(&entry.plural, Value::Object(record));
        }
        Ok(payload)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("docs", &self.state.read().docs.len())
            .field("schema", &self.schema.read().len())
            .finish()
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    fn changes(&self, options: &ChangesOptions) -> StoreResult<ChangeSubscription> {
        Ok(self.feed.subscribe(options))
    }

    fn set_schema(&self, schema: &[SchemaEntry]) -> StoreResult<()> {
        *self.schema.write() = schema.to_vec();
        Ok(())
    }

    async fn find_all(&self, doc_type: &str) -> StoreResult<Payload> {
        let entry = self.entry(doc_type)?;
        self.collect(&entry, None)
    }

    async fn find_many(&self, doc_type: &str, ids: &[String]) -> StoreResult<Payload> {
        let entry = self.entry(doc_type)?;
        self.collect(&entry, Some(ids))
    }

    async fn find_one(&self, doc_type: &str, id: &str) -> StoreResult<Payload> {
        let entry = self.entry(doc_type)?;
        let ids = [id.to_string()];
        self.collect(&entry, Some(&ids[..]))
    }

    async fn save(&self, doc_type: &str, mut data: Map<String, Value>) -> StoreResult<SaveResult> {
        let entry = self.entry(doc_type)?;

        let id = match data.remove(ID_FIELD) {
            Some(value) => id_from_value(&value)
                .ok_or_else(|| StoreError::invalid_document("id must be a string or number"))?,
            None => Uuid::new_v4().to_string().to_uppercase(),
        };
        let supplied = match data.remove(REV_FIELD) {
            Some(Value::String(rev)) => Some(rev),
            Some(Value::Null) | None => None,
            Some(_) => return Err(StoreError::invalid_document("rev must be a string")),
        };

        let key = DocumentId::new(entry.storage_type(), id.as_str()).encode();
        let mut state = self.state.write();
        let current = state.docs.get(&key);
        let live_rev = current.filter(|d| !d.deleted).map(|d| d.rev.to_string());
        if live_rev != supplied {
            return Err(StoreError::Conflict {
                doc_id: key,
                expected: live_rev,
                actual: supplied,
            });
        }

        let generation = current.and_then(|d| d.rev.generation()).unwrap_or(0);
        let rev = make_revision(generation + 1, &data);
        debug!(doc_id = %key, rev = %rev, "saving document");
        self.commit(&mut state, &key, rev.clone(), data, false);

        Ok(SaveResult { id, rev })
    }

    async fn delete(&self, doc_type: &str, data: &Map<String, Value>) -> StoreResult<DeleteResult> {
        let entry = self.entry(doc_type)?;

        let id = data
            .get(ID_FIELD)
            .and_then(id_from_value)
            .ok_or_else(|| StoreError::invalid_document("delete requires an id"))?;
        let supplied = data
            .get(REV_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string);

        let key = DocumentId::new(entry.storage_type(), id.as_str()).encode();
        let mut state = self.state.write();
        let Some(current) = state.docs.get(&key).filter(|d| !d.deleted) else {
            return Err(StoreError::DocumentNotFound { doc_id: key });
        };
        let live_rev = current.rev.to_string();
        if supplied.as_deref() != Some(live_rev.as_str()) {
            return Err(StoreError::Conflict {
                doc_id: key,
                expected: Some(live_rev),
                actual: supplied,
            });
        }

        let generation = current.rev.generation().unwrap_or(0);
        let rev = make_revision(generation + 1, &Map::new());
        debug!(doc_id = %key, rev = %rev, "deleting document");
        self.commit(&mut state, &key, rev.clone(), Map::new(), true);

        Ok(DeleteResult {
            id,
            rev,
            deleted: true,
        })
    }
}

fn make_revision(generation: u64, body: &Map<String, Value>) -> Revision {
    let mut hasher = Sha256::new();
    hasher.update(generation.to_le_bytes());
    // Map serialization cannot fail: keys are strings.
    hasher.update(serde_json::to_vec(body).unwrap_or_default());
    let digest: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    Revision::from_parts(generation, &digest[..REV_DIGEST_LEN])
}

fn to_record(natural_id: &str, doc: &StoredDocument) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert(ID_FIELD.into(), Value::String(natural_id.to_string()));
    record.insert(REV_FIELD.into(), Value::String(doc.rev.to_string()));
    for (k, v) in &doc.body {
        record.insert(k.clone(), v.clone());
    }
    record
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn related_ids(relation: &RelationDef, value: Option<&Value>) -> Vec<String> {
    match (relation, value) {
        (RelationDef::BelongsTo { .. }, Some(value)) => id_from_value(value).into_iter().collect(),
        (RelationDef::HasMany { .. }, Some(Value::Array(values))) => {
            values.iter().filter_map(id_from_value).collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RelationOptions;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn blog_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .set_schema(&[
                SchemaEntry::new("post")
                    .with_relation(
                        "author",
                        RelationDef::BelongsTo {
                            doc_type: "author".into(),
                            options: RelationOptions::default(),
                        },
                    )
                    .with_relation(
                        "comments",
                        RelationDef::HasMany {
                            doc_type: "comment".into(),
                            options: RelationOptions::default().lazy(),
                        },
                    ),
                SchemaEntry::new("author"),
                SchemaEntry::new("comment"),
            ])
            .unwrap();
        store
    }

    #[tokio::test]
    async fn save_and_find_one() {
        let store = blog_store();
        let saved = store
            .save("post", object(json!({"id": "1", "title": "hello"})))
            .await
            .unwrap();
        assert_eq!(saved.id, "1");
        assert_eq!(saved.rev.generation(), Some(1));

        let payload = store.find_one("post", "1").await.unwrap();
        let records = payload.records("posts");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["title"], "hello");
        assert_eq!(records[0]["rev"], saved.rev.as_str());
    }

    #[tokio::test]
    async fn missing_document_yields_empty_payload() {
        let store = blog_store();
        let payload = store.find_one("post", "nope").await.unwrap();
        assert!(payload.records("posts").is_empty());
        assert!(payload.keys().any(|k| k == "posts"));
    }

    #[tokio::test]
    async fn save_generates_id() {
        let store = blog_store();
        let saved = store.save("post", object(json!({"title": "x"}))).await.unwrap();
        assert_eq!(saved.id.len(), 36);
        assert!(store.document("post", &saved.id).is_some());
    }

    #[tokio::test]
    async fn stale_revision_conflicts() {
        let store = blog_store();
        let first = store.save("post", object(json!({"id": "1"}))).await.unwrap();
        let second = store
            .save("post", object(json!({"id": "1", "rev": first.rev.as_str(), "title": "b"})))
            .await
            .unwrap();
        assert_eq!(second.rev.generation(), Some(2));

        let err = store
            .save("post", object(json!({"id": "1", "rev": first.rev.as_str()})))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let err = store.save("post", object(json!({"id": "1"}))).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn delete_requires_current_revision() {
        let store = blog_store();
        let saved = store.save("post", object(json!({"id": "1"}))).await.unwrap();

        let err = store
            .delete("post", &object(json!({"id": "1", "rev": "1-bogus"})))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let deleted = store
            .delete("post", &object(json!({"id": "1", "rev": saved.rev.as_str()})))
            .await
            .unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.rev.generation(), Some(2));
        assert!(store.document("post", "1").is_none());

        let err = store
            .delete("post", &object(json!({"id": "1", "rev": deleted.rev.as_str()})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DocumentNotFound { .. }));
    }

    #[tokio::test]
    async fn find_all_scans_one_type() {
        let store = blog_store();
        for id in ["1", "2", "3"] {
            store.save("post", object(json!({"id": id}))).await.unwrap();
        }
        store.save("author", object(json!({"id": "1"}))).await.unwrap();
        store.put_raw("_design/relational", Map::new());

        let payload = store.find_all("post").await.unwrap();
        assert_eq!(payload.records("posts").len(), 3);
        assert!(payload.records("authors").is_empty());
    }

    #[tokio::test]
    async fn eager_relations_are_sideloaded() {
        let store = blog_store();
        store
            .save("author", object(json!({"id": "a", "name": "Ann"})))
            .await
            .unwrap();
        store.save("comment", object(json!({"id": "c"}))).await.unwrap();
        store
            .save(
                "post",
                object(json!({"id": "1", "author": "a", "comments": ["c"]})),
            )
            .await
            .unwrap();

        let payload = store.find_one("post", "1").await.unwrap();
        assert_eq!(payload.records("authors").len(), 1);
        assert_eq!(payload.records("authors")[0]["name"], "Ann");
        // comments are async, so not sideloaded
        assert!(payload.records("comments").is_empty());
    }

    #[tokio::test]
    async fn writes_are_published_in_order() {
        let store = blog_store();
        let mut sub = store.changes(&ChangesOptions::live_from_now()).unwrap();

        let saved = store.save("post", object(json!({"id": "1"}))).await.unwrap();
        store
            .delete("post", &object(json!({"id": "1", "rev": saved.rev.as_str()})))
            .await
            .unwrap();

        let first = sub.next().await.unwrap();
        assert_eq!(first.id, "post_2_1");
        assert!(!first.deleted);
        assert_eq!(first.doc, None);

        let second = sub.next().await.unwrap();
        assert!(second.deleted);
        assert!(second.seq > first.seq);
    }

    #[tokio::test]
    async fn unknown_type_is_rejected() {
        let store = MemoryStore::new();
        let err = store.find_all("ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownType { .. }));
    }

    #[tokio::test]
    async fn document_type_override_keys_and_reads() {
        let store = MemoryStore::new();
        store
            .set_schema(&[SchemaEntry::new("person")
                .with_plural("people")
                .with_document_type("user")])
            .unwrap();
        let mut sub = store.changes(&ChangesOptions::live_from_now()).unwrap();

        store
            .save("person", object(json!({"id": "1", "name": "Ann"})))
            .await
            .unwrap();

        assert_eq!(sub.next().await.unwrap().id, "user_2_1");
        let doc = store.document("person", "1").unwrap();
        assert_eq!(doc["name"], "Ann");
        assert_eq!(store.find_one("person", "1").await.unwrap().records("people").len(), 1);
    }

    #[test]
    fn raw_documents_bump_generation() {
        let store = MemoryStore::new();
        let first = store.put_raw("_design/x", Map::new());
        let second = store.put_raw("_design/x", Map::new());
        assert_eq!(first.generation(), Some(1));
        assert_eq!(second.generation(), Some(2));
        assert_eq!(store.update_seq(), 2);
    }
}
