//! Reconciliation policy.
//!
//! Decides what a managed change means for the cached record at the same
//! address:
//!
//! | resident | loaded | dirty | deleted | action |
//! |----------|--------|-------|---------|--------|
//! | no       | -      | -     | -       | none   |
//! | yes      | no     | -     | -       | none   |
//! | yes      | yes    | yes   | -       | none   |
//! | yes      | yes    | no    | yes     | unload |
//! | yes      | yes    | no    | no      | reload |
//!
//! Local edits always win until they are saved; a remote echo never
//! overwrites them.

use crate::cache::{CachedRecord, ObjectCache};
use crate::classifier::ClassifiedChange;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Why a managed change caused no action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No record is resident at the address.
    NotResident,
    /// The record has not finished its initial load.
    NotLoaded,
    /// The record has unsaved local edits.
    Dirty,
}

/// What the policy wants done with a record.
#[derive(Debug, Clone)]
pub enum Decision<R> {
    /// Leave the cache alone.
    Skip(SkipReason),
    /// Remove the record from the cache.
    Unload(R),
    /// Refetch the record.
    Reload(R),
}

/// What the policy did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Nothing was requested.
    Skipped(SkipReason),
    /// The record was unloaded.
    Unloaded,
    /// A reload was started in the background.
    ReloadScheduled,
}

/// Applies managed changes to the object cache.
pub struct ReconciliationPolicy<C> {
    cache: Arc<C>,
}

impl<C: ObjectCache> ReconciliationPolicy<C> {
    /// Creates a policy acting on `cache`.
    pub fn new(cache: Arc<C>) -> Self {
        Self { cache }
    }

    /// Decides what to do, without touching the cache.
    pub fn decide(&self, change: &ClassifiedChange) -> Decision<C::Record> {
        let address = &change.address;
        let Some(record) = self
            .cache
            .peek_record(&address.doc_type, &address.natural_id)
        else {
            return Decision::Skip(SkipReason::NotResident);
        };
        if !record.is_loaded() {
            return Decision::Skip(SkipReason::NotLoaded);
        }
        if record.is_dirty() {
            return Decision::Skip(SkipReason::Dirty);
        }

        if change.deleted {
            Decision::Unload(record)
        } else {
            Decision::Reload(record)
        }
    }

    /// Decides and acts.
    ///
    /// Reloads are spawned on the current tokio runtime and not awaited; a
    /// failed reload is logged and otherwise dropped.
    ///
    /// # Panics
    ///
    /// Panics if a reload is needed and no tokio runtime is running.
    pub fn reconcile(&self, change: &ClassifiedChange) -> Reconciliation {
        match self.decide(change) {
            Decision::Skip(reason) => {
                trace!(address = %change.address, seq = change.seq, ?reason, "skipping change");
                Reconciliation::Skipped(reason)
            }
            Decision::Unload(record) => {
                debug!(address = %change.address, seq = change.seq, "unloading deleted record");
                self.cache.unload_record(&record);
                Reconciliation::Unloaded
            }
            Decision::Reload(record) => {
                debug!(address = %change.address, seq = change.seq, "reloading changed record");
                let reload = self.cache.reload_record(&record);
                let address = change.address.clone();
                tokio::spawn(async move {
                    if let Err(err) = reload.await {
                        warn!(%address, error = %err, "background reload failed");
                    }
                });
                Reconciliation::ReloadScheduled
            }
        }
    }
}

impl<C> Clone for ReconciliationPolicy<C> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheCall, MemoryObjectCache, MemoryRecord};
    use relsync_core::DocumentId;
    use serde_json::{json, Map};

    fn change(id: &str, deleted: bool) -> ClassifiedChange {
        ClassifiedChange {
            address: DocumentId::new("post", id),
            deleted,
            seq: 1,
        }
    }

    fn setup() -> (Arc<MemoryObjectCache>, ReconciliationPolicy<MemoryObjectCache>) {
        let cache = Arc::new(MemoryObjectCache::new());
        let policy = ReconciliationPolicy::new(Arc::clone(&cache));
        (cache, policy)
    }

    #[tokio::test]
    async fn absent_record_makes_no_calls() {
        let (cache, policy) = setup();
        assert_eq!(
            policy.reconcile(&change("1", false)),
            Reconciliation::Skipped(SkipReason::NotResident)
        );
        assert_eq!(
            policy.reconcile(&change("1", true)),
            Reconciliation::Skipped(SkipReason::NotResident)
        );
        assert!(cache.calls().is_empty());
    }

    #[tokio::test]
    async fn unloaded_record_is_left_alone() {
        let (cache, policy) = setup();
        cache.insert(MemoryRecord::new("post", "1"));

        assert_eq!(
            policy.reconcile(&change("1", false)),
            Reconciliation::Skipped(SkipReason::NotLoaded)
        );
        assert_eq!(
            policy.reconcile(&change("1", true)),
            Reconciliation::Skipped(SkipReason::NotLoaded)
        );
        assert!(cache.calls().is_empty());
    }

    #[tokio::test]
    async fn dirty_record_is_not_reloaded() {
        let (cache, policy) = setup();
        let record = cache.insert(MemoryRecord::loaded("post", "1", Map::new()));
        record.set_attribute("title", json!("local edit"));

        assert_eq!(
            policy.reconcile(&change("1", false)),
            Reconciliation::Skipped(SkipReason::Dirty)
        );
        assert_eq!(cache.reload_count(), 0);

        // Deletes don't discard local edits either.
        assert_eq!(
            policy.reconcile(&change("1", true)),
            Reconciliation::Skipped(SkipReason::Dirty)
        );
        assert_eq!(cache.unload_count(), 0);
        assert_eq!(record.data()["title"], "local edit");
    }

    #[tokio::test]
    async fn delete_unloads_once() {
        let (cache, policy) = setup();
        cache.insert(MemoryRecord::loaded("post", "1", Map::new()));

        assert_eq!(policy.reconcile(&change("1", true)), Reconciliation::Unloaded);
        assert_eq!(
            cache.calls(),
            vec![CacheCall::Unload(DocumentId::new("post", "1"))]
        );
        assert_eq!(cache.reload_count(), 0);
        assert!(cache.get("post", "1").is_none());
    }

    #[tokio::test]
    async fn update_schedules_reload() {
        let (cache, policy) = setup();
        cache.insert(MemoryRecord::loaded("post", "1", Map::new()));

        assert_eq!(
            policy.reconcile(&change("1", false)),
            Reconciliation::ReloadScheduled
        );
        assert_eq!(
            cache.calls(),
            vec![CacheCall::Reload(DocumentId::new("post", "1"))]
        );
        assert!(cache.get("post", "1").is_some());
    }

    #[tokio::test]
    async fn failed_reload_is_contained() {
        let (cache, policy) = setup();
        cache.insert(MemoryRecord::loaded("post", "1", Map::new()));
        cache.set_loader(|_address| async { Ok(None) });

        assert_eq!(
            policy.reconcile(&change("1", false)),
            Reconciliation::ReloadScheduled
        );
        tokio::task::yield_now().await;
        assert_eq!(cache.reload_count(), 1);
    }

    #[test]
    fn decide_does_not_touch_cache() {
        let (cache, policy) = setup();
        cache.insert(MemoryRecord::loaded("post", "1", Map::new()));

        assert!(matches!(policy.decide(&change("1", false)), Decision::Reload(_)));
        assert!(matches!(policy.decide(&change("1", true)), Decision::Unload(_)));
        assert!(cache.calls().is_empty());
    }
}
