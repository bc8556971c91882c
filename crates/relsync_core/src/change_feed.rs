//! Change feed for observing document mutations.
//!
//! A store emits one [`ChangeNotification`] per document mutation, in
//! increasing sequence order. Consumers open a [`ChangeSubscription`] with
//! [`ChangesOptions`] that select where to start, whether to keep listening,
//! and whether to carry document bodies.
//!
//! # Usage
//!
//! ```rust,ignore
//! use relsync_core::{ChangeFeed, ChangesOptions};
//!
//! let feed = ChangeFeed::new();
//! let mut subscription = feed.subscribe(&ChangesOptions::live_from_now());
//!
//! tokio::spawn(async move {
//!     while let Some(change) = subscription.next().await {
//!         println!("change: {:?}", change);
//!     }
//! });
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

/// One document mutation as reported by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// Encoded document identifier.
    pub id: String,
    /// Whether the mutation deleted the document.
    #[serde(default)]
    pub deleted: bool,
    /// Store-assigned sequence number.
    pub seq: u64,
    /// Document body, present only when the subscription asked for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

impl ChangeNotification {
    /// Creates a notification for a written document.
    pub fn update(id: impl Into<String>, seq: u64) -> Self {
        Self {
            id: id.into(),
            deleted: false,
            seq,
            doc: None,
        }
    }

    /// Creates a notification for a deleted document.
    pub fn deletion(id: impl Into<String>, seq: u64) -> Self {
        Self {
            id: id.into(),
            deleted: true,
            seq,
            doc: None,
        }
    }

    /// Attaches a document body.
    pub fn with_doc(mut self, doc: Value) -> Self {
        self.doc = Some(doc);
        self
    }
}

/// Where a subscription starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Since {
    /// Only changes made after subscribing.
    #[default]
    Now,
    /// Every change still held by the store.
    Beginning,
    /// Changes with a sequence number greater than this one.
    Sequence(u64),
}

/// Options for opening a change subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesOptions {
    /// Starting position.
    pub since: Since,
    /// Keep the subscription open for future changes.
    pub live: bool,
    /// Carry document bodies on each notification.
    pub include_docs: bool,
}

impl ChangesOptions {
    /// Live subscription starting now, without document bodies.
    pub fn live_from_now() -> Self {
        Self {
            since: Since::Now,
            live: true,
            include_docs: false,
        }
    }

    /// Sets the starting position.
    pub fn with_since(mut self, since: Since) -> Self {
        self.since = since;
        self
    }

    /// Sets whether the subscription stays open.
    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Sets whether notifications carry document bodies.
    pub fn with_include_docs(mut self, include_docs: bool) -> Self {
        self.include_docs = include_docs;
        self
    }
}

impl Default for ChangesOptions {
    fn default() -> Self {
        Self::live_from_now()
    }
}

/// An open change subscription.
///
/// Notifications arrive in sequence order. The subscription ends when the
/// store closes the feed or when it is cancelled through [`Self::token`].
pub struct ChangeSubscription {
    receiver: UnboundedReceiver<ChangeNotification>,
    token: CancellationToken,
}

impl ChangeSubscription {
    /// Wraps a receiving channel and the token that cancels it.
    ///
    /// Store implementations own the sending half and should stop sending
    /// once `token` is cancelled.
    pub fn new(receiver: UnboundedReceiver<ChangeNotification>, token: CancellationToken) -> Self {
        Self { receiver, token }
    }

    /// Returns the token that cancels this subscription.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancels the subscription. Safe to call more than once.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once the subscription has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits for the next notification.
    ///
    /// Returns `None` once the subscription is cancelled or the feed ends.
    /// Cancellation wins over notifications that are already buffered.
    pub async fn next(&mut self) -> Option<ChangeNotification> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            change = self.receiver.recv() => change,
        }
    }
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

struct Subscriber {
    sender: UnboundedSender<ChangeNotification>,
    token: CancellationToken,
    include_docs: bool,
}

impl Subscriber {
    fn deliver(&self, change: &ChangeNotification) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        let change = if self.include_docs {
            change.clone()
        } else {
            ChangeNotification {
                doc: None,
                ..change.clone()
            }
        };
        self.sender.send(change).is_ok()
    }
}

/// A change feed that distributes notifications to subscribers.
///
/// The change feed:
/// - Preserves emission order
/// - Supports multiple subscribers
/// - Keeps a bounded history for replay
/// - Is thread-safe
pub struct ChangeFeed {
    /// Subscribers (senders).
    subscribers: RwLock<Vec<Subscriber>>,
    /// History of recent notifications for replay.
    history: RwLock<Vec<ChangeNotification>>,
    /// Maximum history size.
    max_history: usize,
}

impl ChangeFeed {
    /// Creates a new change feed.
    pub fn new() -> Self {
        Self::with_max_history(10_000)
    }

    /// Creates a change feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Opens a subscription.
    ///
    /// Historical notifications selected by `options.since` are queued first.
    /// A non-live subscription ends after the replay.
    pub fn subscribe(&self, options: &ChangesOptions) -> ChangeSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let subscriber = Subscriber {
            sender,
            token: token.clone(),
            include_docs: options.include_docs,
        };

        // Holding the history lock keeps replay and registration atomic
        // with respect to `emit`.
        let history = self.history.read();
        let from = match options.since {
            Since::Now => None,
            Since::Beginning => Some(0),
            Since::Sequence(seq) => Some(seq),
        };
        if let Some(from) = from {
            for change in history.iter().filter(|c| c.seq > from) {
                subscriber.deliver(change);
            }
        }
        if options.live {
            self.subscribers.write().push(subscriber);
        }

        ChangeSubscription::new(receiver, token)
    }

    /// Emits a notification to all subscribers.
    ///
    /// Cancelled and disconnected subscribers are dropped.
    pub fn emit(&self, change: ChangeNotification) {
        let mut history = self.history.write();
        history.push(change.clone());
        if history.len() > self.max_history {
            let to_remove = history.len() - self.max_history;
            history.drain(0..to_remove);
        }

        self.subscribers
            .write()
            .retain(|subscriber| subscriber.deliver(&change));
    }

    /// Closes the feed. Every open subscription ends after its buffer drains.
    pub fn close(&self) {
        self.subscribers.write().clear();
    }

    /// Returns the latest sequence number in history.
    pub fn latest_sequence(&self) -> u64 {
        self.history.read().last().map(|c| c.seq).unwrap_or(0)
    }

    /// Returns the number of live subscribers.
    ///
    /// Cancelled subscribers are counted until the next emit prunes them.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of notifications in history.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscriber_count())
            .field("history", &self.history_len())
            .field("max_history", &self.max_history)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn emit_and_receive() {
        let feed = ChangeFeed::new();
        let mut sub = feed.subscribe(&ChangesOptions::live_from_now());

        let change = ChangeNotification::update("post_2_1", 1);
        feed.emit(change.clone());

        assert_eq!(sub.next().await, Some(change));
    }

    #[tokio::test]
    async fn multiple_subscribers() {
        let feed = ChangeFeed::new();
        let mut sub1 = feed.subscribe(&ChangesOptions::default());
        let mut sub2 = feed.subscribe(&ChangesOptions::default());

        let change = ChangeNotification::deletion("post_2_1", 1);
        feed.emit(change.clone());

        assert_eq!(sub1.next().await, Some(change.clone()));
        assert_eq!(sub2.next().await, Some(change));
    }

    #[tokio::test]
    async fn since_now_skips_history() {
        let feed = ChangeFeed::new();
        feed.emit(ChangeNotification::update("post_2_old", 1));

        let mut sub = feed.subscribe(&ChangesOptions::live_from_now());
        feed.emit(ChangeNotification::update("post_2_new", 2));

        let change = sub.next().await.unwrap();
        assert_eq!(change.id, "post_2_new");
    }

    #[tokio::test]
    async fn replay_from_sequence_then_end() {
        let feed = ChangeFeed::new();
        for seq in 1..=5 {
            feed.emit(ChangeNotification::update(format!("post_2_{seq}"), seq));
        }

        let options = ChangesOptions::default()
            .with_since(Since::Sequence(2))
            .with_live(false);
        let mut sub = feed.subscribe(&options);

        let mut seen = Vec::new();
        while let Some(change) = sub.next().await {
            seen.push(change.seq);
        }
        assert_eq!(seen, vec![3, 4, 5]);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn bodies_are_stripped_unless_requested() {
        let feed = ChangeFeed::new();
        let mut bare = feed.subscribe(&ChangesOptions::default());
        let mut full = feed.subscribe(&ChangesOptions::default().with_include_docs(true));

        feed.emit(ChangeNotification::update("post_2_1", 1).with_doc(json!({"title": "a"})));

        assert_eq!(bare.next().await.unwrap().doc, None);
        assert_eq!(full.next().await.unwrap().doc, Some(json!({"title": "a"})));
    }

    #[tokio::test]
    async fn cancel_ends_subscription() {
        let feed = ChangeFeed::new();
        let mut sub = feed.subscribe(&ChangesOptions::default());
        assert_eq!(feed.subscriber_count(), 1);

        feed.emit(ChangeNotification::update("post_2_1", 1));
        sub.cancel();
        sub.cancel();
        assert!(sub.is_cancelled());

        // Buffered notifications are not delivered after cancellation.
        assert_eq!(sub.next().await, None);

        feed.emit(ChangeNotification::update("post_2_2", 2));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn close_ends_subscription() {
        let feed = ChangeFeed::new();
        let mut sub = feed.subscribe(&ChangesOptions::default());
        feed.emit(ChangeNotification::update("post_2_1", 1));
        feed.close();

        assert!(sub.next().await.is_some());
        assert_eq!(sub.next().await, None);
    }

    #[test]
    fn history_truncation() {
        let feed = ChangeFeed::with_max_history(5);
        for seq in 1..=10 {
            feed.emit(ChangeNotification::update("post_2_1", seq));
        }
        assert_eq!(feed.history_len(), 5);
        assert_eq!(feed.latest_sequence(), 10);
    }

    #[test]
    fn notification_json_shape() {
        let change: ChangeNotification =
            serde_json::from_str(r#"{"id":"post_2_1","seq":7}"#).unwrap();
        assert!(!change.deleted);
        assert_eq!(change.seq, 7);
        assert_eq!(change.doc, None);
    }
}
