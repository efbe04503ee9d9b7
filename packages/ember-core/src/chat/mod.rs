//! # Chat
//!
//! Messages between matched profiles and live per-thread feeds.
//!
//! ## Thread Identity
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          THREAD IDENTITY                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  thread id      "{min}:{max}"            local store prefix             │
//! │  message key    "{min}:{max}:{msg id}"   one record per message         │
//! │  topic          "chat/" + hex(SHA-256(min ‖ 0 ‖ max)[..16])             │
//! │                                                                         │
//! │  The topic is what the sync layer sees, so relays never learn which     │
//! │  two profiles are talking.                                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Content is immutable once sent. Only the `delivered` and `read` flags
//! change, and only from false to true.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::matching::canonical_pair;
use crate::profile::ProfileId;
use crate::storage::{Entity, EntityKind};
use crate::sync::TopicSubscription;

/// Prefix of every chat topic
pub const TOPIC_PREFIX: &str = "chat/";

/// Thread id for a pair of profiles
pub fn thread_id(x: &str, y: &str) -> String {
    let (a, b) = canonical_pair(x, y);
    format!("{}:{}", a, b)
}

/// Sync topic for a pair of profiles
pub fn thread_topic(x: &str, y: &str) -> String {
    let (a, b) = canonical_pair(x, y);
    let mut hasher = Sha256::new();
    hasher.update(a.as_bytes());
    hasher.update([0u8]);
    hasher.update(b.as_bytes());
    let digest = hasher.finalize();
    format!("{}{}", TOPIC_PREFIX, hex::encode(&digest[..16]))
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Globally unique id
    pub id: String,
    /// Sender
    pub sender_id: ProfileId,
    /// Recipient
    pub recipient_id: ProfileId,
    /// Text content
    pub body: String,
    /// Send time (ms)
    pub at: i64,
    /// Reached the recipient's device
    #[serde(default)]
    pub delivered: bool,
    /// Seen by the recipient
    #[serde(default)]
    pub read: bool,
}

impl ChatMessage {
    /// Create a new outgoing message
    pub fn new(sender_id: &str, recipient_id: &str, body: impl Into<String>, at: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            body: body.into(),
            at,
            delivered: false,
            read: false,
        }
    }

    /// Thread this message belongs to
    pub fn thread_id(&self) -> String {
        thread_id(&self.sender_id, &self.recipient_id)
    }

    /// Sync topic of this message's thread
    pub fn topic(&self) -> String {
        thread_topic(&self.sender_id, &self.recipient_id)
    }

    /// Whether a profile is sender or recipient
    pub fn involves(&self, id: &str) -> bool {
        self.sender_id == id || self.recipient_id == id
    }

    /// Check content and ids
    pub fn validate(&self, max_length: usize) -> Result<()> {
        crate::profile::validate_profile_id(&self.sender_id)?;
        crate::profile::validate_profile_id(&self.recipient_id)?;
        if self.id.is_empty() || self.id.contains(':') {
            return Err(Error::InvalidMessageContent(
                "Message id must be non-empty and contain no ':'".into(),
            ));
        }
        if self.sender_id == self.recipient_id {
            return Err(Error::InvalidMessageContent(
                "Cannot message yourself".into(),
            ));
        }
        if self.body.trim().is_empty() {
            return Err(Error::InvalidMessageContent(
                "Message cannot be empty".into(),
            ));
        }
        if self.body.chars().count() > max_length {
            return Err(Error::InvalidMessageContent(format!(
                "Message too long: max {} characters",
                max_length
            )));
        }
        Ok(())
    }
}

impl Entity for ChatMessage {
    const KIND: EntityKind = EntityKind::Message;

    fn key(&self) -> String {
        format!("{}:{}", self.thread_id(), self.id)
    }

    fn updated_at(&self) -> i64 {
        self.at
    }

    fn resolve(existing: &Self, incoming: Self) -> Option<Self> {
        let delivered = existing.delivered || incoming.delivered || incoming.read;
        let read = existing.read || incoming.read;

        if delivered == existing.delivered && read == existing.read {
            return None;
        }
        Some(Self {
            delivered,
            read,
            ..existing.clone()
        })
    }
}

/// How far behind the newest delivered message an id is remembered (ms)
const SEEN_WINDOW_MS: i64 = 10 * 60 * 1000;

/// Most ids a subscription remembers
const SEEN_CAPACITY: usize = 1024;

/// Ids of recently delivered messages
///
/// The store only broadcasts a message on its first insert, so duplicates
/// arrive close together. Ids older than the window, or beyond the
/// capacity, are forgotten.
#[derive(Debug, Default)]
struct SeenWindow {
    ids: HashSet<String>,
    order: VecDeque<(i64, String)>,
    newest: i64,
}

impl SeenWindow {
    /// Remember an id, returns `false` if it was already delivered
    fn insert(&mut self, id: &str, at: i64) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.newest = self.newest.max(at);
        self.ids.insert(id.to_string());
        self.order.push_back((at, id.to_string()));
        self.evict();
        true
    }

    fn evict(&mut self) {
        let horizon = self.newest.saturating_sub(SEEN_WINDOW_MS);
        while let Some((at, id)) = self.order.front() {
            if *at >= horizon && self.order.len() <= SEEN_CAPACITY {
                break;
            }
            self.ids.remove(id);
            self.order.pop_front();
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Live feed of one chat thread
///
/// Each message reaches the handler at most once, however many paths
/// (local send, live topic, pull) deliver it. Dropping the handle stops
/// delivery and releases the topic listener.
pub struct ChatSubscription {
    thread: String,
    task: Option<JoinHandle<()>>,
    listener: Option<TopicSubscription>,
}

impl ChatSubscription {
    /// Start forwarding a thread's messages from a local feed
    pub(crate) fn spawn<F>(
        thread: String,
        mut feed: broadcast::Receiver<ChatMessage>,
        listener: Option<TopicSubscription>,
        mut handler: F,
    ) -> Self
    where
        F: FnMut(ChatMessage) + Send + 'static,
    {
        let wanted = thread.clone();
        let task = tokio::spawn(async move {
            let mut seen = SeenWindow::default();
            loop {
                match feed.recv().await {
                    Ok(message) => {
                        if message.thread_id() != wanted {
                            continue;
                        }
                        if seen.insert(&message.id, message.at) {
                            handler(message);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(thread = %wanted, skipped, "Chat feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            thread,
            task: Some(task),
            listener,
        }
    }

    /// Thread being followed
    pub fn thread_id(&self) -> &str {
        &self.thread
    }

    /// Whether messages are still being delivered
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop delivery
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(thread = %self.thread, "Chat subscription closed");
        }
        self.listener.take();
    }
}

impl Drop for ChatSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_thread_id_is_order_independent() {
        assert_eq!(thread_id("bob", "alice"), "alice:bob");
        assert_eq!(thread_id("alice", "bob"), "alice:bob");
        assert_eq!(thread_topic("bob", "alice"), thread_topic("alice", "bob"));
    }

    #[test]
    fn test_topic_hides_participants() {
        let topic = thread_topic("alice", "bob");
        assert!(topic.starts_with(TOPIC_PREFIX));
        assert!(!topic.contains("alice"));
        assert_eq!(topic.len(), TOPIC_PREFIX.len() + 32);
        assert_ne!(topic, thread_topic("alice", "carol"));
    }

    #[test]
    fn test_message_key_groups_by_thread() {
        let msg = ChatMessage::new("bob", "alice", "hi", 1);
        assert!(msg.key().starts_with("alice:bob:"));
        assert!(msg.involves("alice"));
        assert!(!msg.involves("carol"));
    }

    #[test]
    fn test_validation() {
        let ok = ChatMessage::new("alice", "bob", "hello", 1);
        assert!(ok.validate(10).is_ok());

        let empty = ChatMessage::new("alice", "bob", "   ", 1);
        assert!(matches!(empty.validate(10), Err(Error::InvalidMessageContent(_))));

        let long = ChatMessage::new("alice", "bob", "x".repeat(11), 1);
        assert!(long.validate(10).is_err());

        let to_self = ChatMessage::new("alice", "alice", "hi", 1);
        assert!(to_self.validate(10).is_err());
    }

    #[test]
    fn test_seen_window_is_bounded() {
        let mut seen = SeenWindow::default();
        assert!(seen.insert("m1", 1_000));
        assert!(!seen.insert("m1", 1_000));

        // Far newer traffic pushes the old id out of the window
        assert!(seen.insert("m2", 1_000 + SEEN_WINDOW_MS + 1));
        assert_eq!(seen.len(), 1);

        let base = 10 * SEEN_WINDOW_MS;
        for i in 0..(SEEN_CAPACITY as i64 + 50) {
            seen.insert(&format!("burst-{}", i), base + i);
        }
        assert_eq!(seen.len(), SEEN_CAPACITY);
        assert!(!seen.insert(&format!("burst-{}", SEEN_CAPACITY as i64 + 49), base));
    }

    #[test]
    fn test_flags_merge_monotonically() {
        let sent = ChatMessage::new("alice", "bob", "hi", 1);
        let mut read = sent.clone();
        read.read = true;

        let merged = ChatMessage::resolve(&sent, read.clone()).unwrap();
        assert!(merged.delivered && merged.read);

        // A stale copy cannot clear the flags
        assert_eq!(ChatMessage::resolve(&merged, sent.clone()), None);
        // Same flags: nothing to write
        assert_eq!(ChatMessage::resolve(&sent, sent.clone()), None);
    }

    #[test]
    fn test_content_is_immutable() {
        let sent = ChatMessage::new("alice", "bob", "hi", 1);
        let mut tampered = sent.clone();
        tampered.body = "changed".into();
        tampered.delivered = true;

        let merged = ChatMessage::resolve(&sent, tampered).unwrap();
        assert_eq!(merged.body, "hi");
        assert!(merged.delivered);
    }

    #[tokio::test]
    async fn test_subscription_delivers_once_per_message() {
        let (tx, rx) = broadcast::channel(16);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();

        let subscription = ChatSubscription::spawn(
            thread_id("alice", "bob"),
            rx,
            None,
            move |msg: ChatMessage| sink.lock().unwrap().push(msg.id),
        );

        let first = ChatMessage::new("alice", "bob", "one", 1);
        let other_thread = ChatMessage::new("alice", "carol", "nope", 2);
        let second = ChatMessage::new("bob", "alice", "two", 3);
        tx.send(first.clone()).unwrap();
        tx.send(first.clone()).unwrap();
        tx.send(other_thread).unwrap();
        tx.send(second.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*received.lock().unwrap(), vec![first.id.clone(), second.id.clone()]);

        subscription.unsubscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = tx.send(ChatMessage::new("alice", "bob", "late", 4));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.lock().unwrap().len(), 2);
    }
}
