//! Live query feeds.
//!
//! A feed delivers full result-set snapshots. Every publish replaces the
//! previous list for that scope and subscribers always replace, never patch,
//! their local copy. Redundant snapshots are cheaper than a drifted view.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use tokio::sync::watch;

/// Receiving side of a live query.
pub struct Subscription<T> {
    rx: watch::Receiver<Vec<T>>,
}

impl<T: Clone> Subscription<T> {
    /// The most recent snapshot, without waiting.
    pub fn current(&self) -> Vec<T> {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot.
    ///
    /// Returns `None` once the publishing store has been dropped. Snapshots
    /// published while the caller was busy are coalesced into the latest.
    pub async fn next(&mut self) -> Option<Vec<T>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// One snapshot channel per query scope (owner id, user id, chat id).
pub struct LiveFeeds<K, T> {
    feeds: Mutex<HashMap<K, watch::Sender<Vec<T>>>>,
}

impl<K: Eq + Hash + Clone, T: Clone> LiveFeeds<K, T> {
    pub fn new() -> Self {
        Self {
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Register a subscriber for `scope` before its initial query runs.
    ///
    /// Writes published between `register` and [`seed`](Self::seed) reach
    /// the new subscriber, so nothing is lost while the query is in flight.
    pub fn register(&self, scope: &K) -> Subscription<T> {
        let mut feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());
        let tx = feeds
            .entry(scope.clone())
            .or_insert_with(|| watch::channel(Vec::new()).0);
        let mut rx = tx.subscribe();
        rx.borrow_and_update();
        Subscription { rx }
    }

    /// Seed a registered subscriber with the result of its initial query.
    ///
    /// If a write was published since registration, that snapshot is newer
    /// than `initial` and is kept instead.
    pub fn seed(&self, scope: &K, subscription: &mut Subscription<T>, initial: Vec<T>) {
        let feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());
        let published = subscription.rx.has_changed().unwrap_or(false);
        if let (false, Some(tx)) = (published, feeds.get(scope)) {
            tx.send_replace(initial);
        }
        subscription.rx.borrow_and_update();
    }

    /// Register and seed in one step, for stores whose query cannot race a
    /// write.
    pub fn subscribe(&self, scope: &K, initial: Vec<T>) -> Subscription<T> {
        let mut subscription = self.register(scope);
        self.seed(scope, &mut subscription, initial);
        subscription
    }

    /// Publish a full snapshot for `scope`. No-op when nobody ever subscribed.
    pub fn publish(&self, scope: &K, snapshot: Vec<T>) {
        let feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = feeds.get(scope) {
            tx.send_replace(snapshot);
        }
    }

    /// Whether `scope` has at least one live subscriber.
    pub fn is_watched(&self, scope: &K) -> bool {
        let feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());
        feeds.get(scope).is_some_and(|tx| tx.receiver_count() > 0)
    }
}

impl<K: Eq + Hash + Clone, T: Clone> Default for LiveFeeds<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_replaces() {
        let feeds: LiveFeeds<String, u32> = LiveFeeds::new();
        let scope = "owner".to_string();
        let mut sub = feeds.subscribe(&scope, vec![1, 2]);
        assert_eq!(sub.current(), vec![1, 2]);

        feeds.publish(&scope, vec![3]);
        assert_eq!(sub.next().await, Some(vec![3]));
        assert_eq!(sub.current(), vec![3]);
    }

    #[tokio::test]
    async fn test_ends_when_publisher_dropped() {
        let feeds: LiveFeeds<String, u32> = LiveFeeds::new();
        let mut sub = feeds.subscribe(&"x".to_string(), vec![]);
        drop(feeds);
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_write_during_initial_query_is_kept() {
        let feeds: LiveFeeds<String, u32> = LiveFeeds::new();
        let scope = "owner".to_string();
        let mut sub = feeds.register(&scope);
        assert!(feeds.is_watched(&scope));

        // A write lands while the subscriber's initial query is running.
        feeds.publish(&scope, vec![1, 2]);
        feeds.seed(&scope, &mut sub, vec![1]);
        assert_eq!(sub.current(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_late_subscriber_does_not_rewind_existing_ones() {
        let feeds: LiveFeeds<String, u32> = LiveFeeds::new();
        let scope = "owner".to_string();
        let first = feeds.subscribe(&scope, vec![1]);

        let mut second = feeds.register(&scope);
        feeds.publish(&scope, vec![1, 2]);
        feeds.seed(&scope, &mut second, vec![1]);

        assert_eq!(first.current(), vec![1, 2]);
        assert_eq!(second.current(), vec![1, 2]);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let feeds: LiveFeeds<String, u32> = LiveFeeds::new();
        feeds.publish(&"nobody".to_string(), vec![1]);
        assert!(!feeds.is_watched(&"nobody".to_string()));
    }
}
