//! The adapter: lifecycle of the change listener plus the CRUD façade.

use crate::cache::{ModelSchema, ObjectCache};
use crate::classifier::ChangeClassifier;
use crate::config::AdapterConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::listener::{ChangeFeedListener, ListenerStats};
use crate::policy::ReconciliationPolicy;
use crate::registry::SchemaRegistry;
use parking_lot::{Mutex, RwLock};
use relsync_core::{
    pluralize, Payload, RelationalStore, Revision, SaveResult, SchemaEntry, ID_FIELD, REV_FIELD,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// A record as handed to the adapter for writing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSnapshot {
    /// Natural id; `None` lets the store generate one.
    pub id: Option<String>,
    /// Serialized attributes and relationship ids.
    pub attributes: Map<String, Value>,
}

impl RecordSnapshot {
    /// Creates a snapshot for a record that has no id yet.
    pub fn new(attributes: Map<String, Value>) -> Self {
        Self {
            id: None,
            attributes,
        }
    }

    /// Sets the natural id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Builder for [`Adapter`].
pub struct AdapterBuilder<S, C> {
    store: Option<Arc<S>>,
    cache: Option<Arc<C>>,
    config: AdapterConfig,
}

impl<S: RelationalStore + 'static, C: ObjectCache> AdapterBuilder<S, C> {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            store: None,
            cache: None,
            config: AdapterConfig::default(),
        }
    }

    /// Sets the relational store.
    pub fn store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the object cache.
    pub fn cache(mut self, cache: Arc<C>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: AdapterConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the adapter. The listener is not started.
    pub fn build(self) -> AdapterResult<Adapter<S, C>> {
        let store = self.store.ok_or(AdapterError::MissingStore)?;
        let cache = self.cache.ok_or(AdapterError::MissingCache)?;
        Ok(Adapter {
            store,
            cache,
            config: self.config,
            registry: Arc::new(RwLock::new(SchemaRegistry::new())),
            listener: Mutex::new(ChangeFeedListener::new()),
        })
    }
}

impl<S: RelationalStore + 'static, C: ObjectCache> Default for AdapterBuilder<S, C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps an object cache in sync with a relational document store.
///
/// Dropping the adapter stops its listener.
pub struct Adapter<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
    config: AdapterConfig,
    registry: Arc<RwLock<SchemaRegistry>>,
    listener: Mutex<ChangeFeedListener>,
}

impl<S: RelationalStore + 'static, C: ObjectCache> Adapter<S, C> {
    /// Returns a builder.
    pub fn builder() -> AdapterBuilder<S, C> {
        AdapterBuilder::new()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the object cache.
    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    /// Returns true if finds should be coalesced into [`Self::find_many`].
    pub fn coalesce_find_requests(&self) -> bool {
        self.config.coalesce_find_requests
    }

    /// Opens the change subscription and starts the listener task.
    ///
    /// Fails with [`AdapterError::NoRuntime`] outside a tokio runtime, and
    /// with [`AdapterError::AlreadyStarted`] on any call after the first,
    /// including after [`Self::stop`].
    pub fn start(&self) -> AdapterResult<()> {
        let mut listener = self.listener.lock();
        if !listener.state().can_start() {
            return Err(AdapterError::AlreadyStarted);
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(AdapterError::NoRuntime);
        }
        let subscription = self.store.changes(&self.config.changes)?;
        let classifier = ChangeClassifier::new(Arc::clone(&self.store), Arc::clone(&self.cache))
            .with_registry(Arc::clone(&self.registry));
        listener.start(
            subscription,
            classifier,
            ReconciliationPolicy::new(Arc::clone(&self.cache)),
        )
    }

    /// Cancels the change subscription. Idempotent, and a no-op before
    /// [`Self::start`].
    pub fn stop(&self) {
        self.listener.lock().stop();
    }

    /// Waits for the listener task to exit.
    ///
    /// Returns immediately if the listener never started or was already
    /// joined.
    pub async fn join(&self) {
        let task = self.listener.lock().take_task();
        if let Some(task) = task {
            if let Err(err) = task.await {
                debug!(error = %err, "change listener task aborted");
            }
        }
    }

    /// Returns true while the listener is running.
    pub fn is_running(&self) -> bool {
        self.listener.lock().is_running()
    }

    /// Returns the listener counters.
    pub fn stats(&self) -> ListenerStats {
        self.listener.lock().stats()
    }

    /// Returns the schema entries registered so far.
    pub fn schema(&self) -> Vec<SchemaEntry> {
        self.registry.read().entries().to_vec()
    }

    /// Registers `model` and its related models, pushing the schema to the
    /// store when anything was added.
    pub fn ensure_registered(&self, model: &str) -> AdapterResult<ModelSchema> {
        let schema = self.cache.model_for(model)?;
        let mut registry = self.registry.write();
        let before = registry.len();
        let result = registry.register(&schema, &self.config.revision_attribute, |name| {
            Ok(self.cache.model_for(name)?)
        });
        if registry.len() > before {
            debug!(model, entries = registry.len(), "pushing schema to store");
            self.store.set_schema(registry.entries())?;
        }
        result?;
        Ok(schema)
    }

    /// Converts a snapshot into document data.
    ///
    /// The id is included when present. The revision attribute is written as
    /// `rev` and dropped when it is null.
    pub fn record_to_data(&self, snapshot: &RecordSnapshot) -> Map<String, Value> {
        let mut data = snapshot.attributes.clone();
        if let Some(id) = &snapshot.id {
            data.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        }
        match data.remove(&self.config.revision_attribute) {
            Some(Value::Null) | None => {}
            Some(rev) => {
                data.insert(REV_FIELD.to_string(), rev);
            }
        }
        data
    }

    /// Fetches every record of `model`.
    pub async fn find_all(&self, model: &str) -> AdapterResult<Payload> {
        self.ensure_registered(model)?;
        Ok(self.store.find_all(model).await?)
    }

    /// Fetches the records of `model` with the given ids.
    pub async fn find_many(&self, model: &str, ids: &[String]) -> AdapterResult<Payload> {
        self.ensure_registered(model)?;
        Ok(self.store.find_many(model, ids).await?)
    }

    /// Always fails: arbitrary queries are not supported.
    pub async fn find_query(&self, _model: &str, _query: &Value) -> AdapterResult<Payload> {
        Err(AdapterError::Unsupported("findQuery"))
    }

    /// Fetches one record.
    ///
    /// Fails with [`AdapterError::NotFound`] when the payload holds no
    /// records under the model's singular or plural key.
    pub async fn find(&self, model: &str, id: &str) -> AdapterResult<Payload> {
        self.ensure_registered(model)?;
        let payload = self.store.find_one(model, id).await?;

        let plural = self
            .registry
            .read()
            .get(model)
            .map(|entry| entry.plural.clone())
            .unwrap_or_else(|| pluralize(model));
        if payload.has_records(&[model, plural.as_str()]) {
            Ok(payload)
        } else {
            Err(AdapterError::NotFound {
                model: model.to_string(),
                id: id.to_string(),
            })
        }
    }

    /// Saves a new record.
    pub async fn create_record(
        &self,
        model: &str,
        snapshot: &RecordSnapshot,
    ) -> AdapterResult<SaveResult> {
        self.ensure_registered(model)?;
        let data = self.record_to_data(snapshot);
        let saved = self.store.save(model, data).await?;
        info!(model, id = %saved.id, rev = %saved.rev, "record created");
        Ok(saved)
    }

    /// Saves changes to an existing record.
    pub async fn update_record(
        &self,
        model: &str,
        snapshot: &RecordSnapshot,
    ) -> AdapterResult<SaveResult> {
        self.ensure_registered(model)?;
        let data = self.record_to_data(snapshot);
        let saved = self.store.save(model, data).await?;
        debug!(model, id = %saved.id, rev = %saved.rev, "record updated");
        Ok(saved)
    }

    /// Deletes a record, returning the revision of the removal.
    pub async fn delete_record(
        &self,
        model: &str,
        snapshot: &RecordSnapshot,
    ) -> AdapterResult<Revision> {
        self.ensure_registered(model)?;
        let data = self.record_to_data(snapshot);
        let deleted = self.store.delete(model, &data).await?;
        debug!(model, id = %deleted.id, rev = %deleted.rev, "record deleted");
        Ok(deleted.rev)
    }
}

impl<S, C> std::fmt::Debug for Adapter<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("config", &self.config)
            .field("listener", &*self.listener.lock())
            .field("registered", &self.registry.read().len())
            .finish()
    }
}
