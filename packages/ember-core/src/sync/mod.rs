//! # Sync Module
//!
//! Best-effort, eventually consistent replication between replicas.
//!
//! ## Replication Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         REPLICATION FLOW                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Replica A                                          Replica B           │
//! │  ─────────                                          ─────────           │
//! │                                                                         │
//! │  local write ──► Store (authoritative)                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Replicator outbox ──push (backoff)──► SyncBridge ──pull(cursor)──►     │
//! │                                          │            Store.save()      │
//! │                                          │            (conflict policy) │
//! │                                          │                              │
//! │                                          └──topic──► live chat feed     │
//! │                                                                         │
//! │  • Push failures never fail the local write                             │
//! │  • Pushes are idempotent, a retried envelope is harmless                │
//! │  • Cursor only moves after the pulled batch has been applied            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transport is behind [`SyncBridge`]. [`GossipHub`] is the in-process
//! implementation used for tests and single-host deployments.

pub mod hub;
pub mod replicator;

pub use hub::{GossipHub, HubBridge};
pub use replicator::{PulledChanges, PushReport, Replicator};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::storage::{Entity, EntityKind, StoredRecord};

/// Sync tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Push attempts per envelope per flush
    pub max_push_attempts: u32,
    /// First retry delay (ms)
    pub initial_backoff_ms: u64,
    /// Retry delay ceiling (ms)
    pub max_backoff_ms: u64,
    /// Envelopes requested per pull
    pub pull_batch_size: usize,
    /// Background sync period (ms)
    pub poll_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_push_attempts: 5,
            initial_backoff_ms: 250,
            max_backoff_ms: 30_000,
            pull_batch_size: 256,
            poll_interval_ms: 5_000,
        }
    }
}

impl SyncConfig {
    /// Validate the values
    pub fn validate(&self) -> Result<()> {
        if self.max_push_attempts == 0 {
            return Err(Error::InvalidConfig(
                "sync.max_push_attempts must be at least 1".into(),
            ));
        }
        if self.pull_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "sync.pull_batch_size must be at least 1".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "sync.poll_interval_ms must be at least 1".into(),
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(Error::InvalidConfig(
                "sync.initial_backoff_ms exceeds sync.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

/// One replicated write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    /// Content id, identical for identical writes
    pub id: String,
    /// Replica that produced the write
    pub origin: String,
    /// Entity kind
    pub kind: EntityKind,
    /// Entity key
    pub key: String,
    /// Entity timestamp (ms)
    pub updated_at: i64,
    /// Live topic, set for chat messages
    pub topic: Option<String>,
    /// JSON encoded entity
    pub payload: Vec<u8>,
}

impl SyncEnvelope {
    /// Wrap an entity for replication
    pub fn wrap<E: Entity>(origin: &str, entity: &E, topic: Option<String>) -> Result<Self> {
        let record = entity.to_record()?;
        Ok(Self::from_record(origin, record, topic))
    }

    /// Wrap a raw record for replication
    pub fn from_record(origin: &str, record: StoredRecord, topic: Option<String>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(record.kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(record.key.as_bytes());
        hasher.update([0u8]);
        hasher.update(record.updated_at.to_be_bytes());
        hasher.update(&record.payload);
        let digest = hasher.finalize();

        Self {
            id: hex::encode(&digest[..16]),
            origin: origin.to_string(),
            kind: record.kind,
            key: record.key,
            updated_at: record.updated_at,
            topic,
            payload: record.payload,
        }
    }

    /// The raw record carried
    pub fn to_record(&self) -> StoredRecord {
        StoredRecord {
            kind: self.kind,
            key: self.key.clone(),
            updated_at: self.updated_at,
            payload: self.payload.clone(),
        }
    }

    /// Decode the carried entity
    pub fn open<E: Entity>(&self) -> Result<E> {
        E::from_record(&self.to_record())
    }

    /// Whether a profile id is one of the key's segments
    pub fn mentions(&self, profile_id: &str) -> bool {
        self.key.split(':').any(|segment| segment == profile_id)
    }

    /// Encode for the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from the wire
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| Error::DeserializationError(format!("Bad sync envelope: {}", e)))
    }
}

/// Replication position per remote origin
///
/// A position counts the envelopes already consumed from that origin's log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    positions: BTreeMap<String, u64>,
}

impl SyncCursor {
    /// Empty cursor (start of every log)
    pub fn new() -> Self {
        Self::default()
    }

    /// Position for an origin
    pub fn position(&self, origin: &str) -> u64 {
        self.positions.get(origin).copied().unwrap_or(0)
    }

    /// Move an origin's position forward (never backward)
    pub fn advance(&mut self, origin: &str, position: u64) {
        let entry = self.positions.entry(origin.to_string()).or_insert(0);
        *entry = (*entry).max(position);
    }

    /// Origins seen so far
    pub fn origins(&self) -> impl Iterator<Item = &str> {
        self.positions.keys().map(String::as_str)
    }
}

/// Result of one pull
#[derive(Debug, Clone, Default)]
pub struct PullBatch {
    /// Envelopes in log order per origin
    pub envelopes: Vec<SyncEnvelope>,
    /// Cursor to resume from
    pub cursor: SyncCursor,
    /// Whether more envelopes are waiting
    pub has_more: bool,
}

/// Callback for live topic envelopes
pub type EnvelopeHandler = Arc<dyn Fn(SyncEnvelope) + Send + Sync>;

/// Live topic subscription
///
/// Dropping the handle stops delivery and releases the listener.
pub struct TopicSubscription {
    topic: String,
    task: Option<JoinHandle<()>>,
}

impl TopicSubscription {
    /// Wrap a listener task
    pub fn new(topic: impl Into<String>, task: JoinHandle<()>) -> Self {
        Self {
            topic: topic.into(),
            task: Some(task),
        }
    }

    /// The topic listened to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether the listener is still running
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop listening
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(topic = %self.topic, "Topic subscription closed");
        }
    }
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A replication transport
#[async_trait]
pub trait SyncBridge: Send + Sync {
    /// Id of the local replica
    fn peer_id(&self) -> &str;

    /// Publish one envelope
    ///
    /// Must be idempotent: pushing the same envelope twice has the same
    /// effect as pushing it once.
    async fn push(&self, envelope: &SyncEnvelope) -> Result<()>;

    /// Fetch envelopes from other replicas after `since`
    async fn pull(&self, since: &SyncCursor, limit: usize) -> Result<PullBatch>;

    /// Listen for envelopes published on a topic by other replicas
    async fn subscribe(&self, topic: &str, handler: EnvelopeHandler) -> Result<TopicSubscription>;
}
