//! The change-feed listener.
//!
//! Owns the single live subscription of an adapter and the task that drains
//! it. Notifications are processed one at a time, in arrival order.

use crate::cache::ObjectCache;
use crate::classifier::{ChangeClassifier, Classification};
use crate::error::{AdapterError, AdapterResult};
use crate::policy::{Reconciliation, ReconciliationPolicy};
use relsync_core::{ChangeSubscription, RelationalStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Lifecycle of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Not started yet.
    Idle,
    /// Subscribed and processing notifications.
    Running,
    /// Torn down. A stopped listener is not restarted.
    Stopped,
}

impl ListenerState {
    /// Returns true if the listener may be started.
    pub fn can_start(&self) -> bool {
        matches!(self, ListenerState::Idle)
    }
}

/// Counters for processed notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Notifications received from the feed.
    pub received: u64,
    /// Notifications dropped by the classifier.
    pub ignored: u64,
    /// Managed changes that caused no cache call.
    pub skipped: u64,
    /// Records unloaded.
    pub unloaded: u64,
    /// Reloads started.
    pub reloads_scheduled: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    ignored: AtomicU64,
    skipped: AtomicU64,
    unloaded: AtomicU64,
    reloads_scheduled: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ListenerStats {
        ListenerStats {
            received: self.received.load(Ordering::SeqCst),
            ignored: self.ignored.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            unloaded: self.unloaded.load(Ordering::SeqCst),
            reloads_scheduled: self.reloads_scheduled.load(Ordering::SeqCst),
        }
    }

    fn record(&self, outcome: Reconciliation) {
        let counter = match outcome {
            Reconciliation::Skipped(_) => &self.skipped,
            Reconciliation::Unloaded => &self.unloaded,
            Reconciliation::ReloadScheduled => &self.reloads_scheduled,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Drives a change subscription through the classifier and the policy.
pub struct ChangeFeedListener {
    state: ListenerState,
    token: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl ChangeFeedListener {
    /// Creates an idle listener.
    pub fn new() -> Self {
        Self {
            state: ListenerState::Idle,
            token: None,
            task: None,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Returns true while the listener holds a live subscription.
    pub fn is_running(&self) -> bool {
        self.state == ListenerState::Running
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> ListenerStats {
        self.counters.snapshot()
    }

    /// Spawns the task that drains `subscription`.
    ///
    /// Outside a tokio runtime this fails with [`AdapterError::NoRuntime`]
    /// and the listener stays idle. On any error `subscription` is
    /// cancelled.
    pub fn start<S, C>(
        &mut self,
        mut subscription: ChangeSubscription,
        classifier: ChangeClassifier<S, C>,
        policy: ReconciliationPolicy<C>,
    ) -> AdapterResult<()>
    where
        S: RelationalStore + 'static,
        C: ObjectCache,
    {
        if !self.state.can_start() {
            subscription.cancel();
            return Err(AdapterError::AlreadyStarted);
        }
        if tokio::runtime::Handle::try_current().is_err() {
            subscription.cancel();
            return Err(AdapterError::NoRuntime);
        }

        let counters = Arc::clone(&self.counters);
        self.token = Some(subscription.token());
        self.task = Some(tokio::spawn(async move {
            while let Some(change) = subscription.next().await {
                counters.received.fetch_add(1, Ordering::SeqCst);
                match classifier.classify(&change) {
                    Classification::Ignored(_) => {
                        counters.ignored.fetch_add(1, Ordering::SeqCst);
                    }
                    Classification::Managed(managed) => {
                        counters.record(policy.reconcile(&managed));
                    }
                }
            }
            debug!("change listener finished");
        }));
        self.state = ListenerState::Running;
        info!("change listener started");
        Ok(())
    }

    /// Cancels the subscription. Safe to call repeatedly, and before
    /// [`Self::start`].
    ///
    /// Once this returns no further notification reaches the cache; a
    /// notification already being processed finishes first.
    pub fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
            info!("change listener stopped");
        }
        self.state = ListenerState::Stopped;
    }

    /// Takes the handle of the listener task, if any.
    pub fn take_task(&mut self) -> Option<JoinHandle<()>> {
        self.task.take()
    }
}

impl Default for ChangeFeedListener {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChangeFeedListener {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ChangeFeedListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeedListener")
            .field("state", &self.state)
            .field("stats", &self.stats())
            .finish()
    }
}
