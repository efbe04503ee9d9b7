//! # Gossip Hub
//!
//! In-process replication fabric shared by a set of replicas.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            GOSSIP HUB                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   HubBridge(p1) ──push──►  log[p1]: [frame, frame, ...]                 │
//! │   HubBridge(p2) ──push──►  log[p2]: [frame, ...]                        │
//! │                                                                         │
//! │   HubBridge(p1).pull(cursor) reads log[p2], log[p3] ... from cursor     │
//! │                                                                         │
//! │   topic envelopes are also fanned out live on a broadcast channel       │
//! │                                                                         │
//! │   Frames are bincode encoded envelopes. Pushing an envelope whose id    │
//! │   is already in the origin's log is a no-op.                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reachability can be toggled per replica to simulate partitions.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::{EnvelopeHandler, PullBatch, SyncBridge, SyncCursor, SyncEnvelope, TopicSubscription};
use crate::error::{Error, Result};

/// Default capacity of the live topic channel
pub const DEFAULT_LIVE_CAPACITY: usize = 1024;

#[derive(Default)]
struct OriginLog {
    frames: Vec<Vec<u8>>,
    ids: HashSet<String>,
}

struct HubInner {
    logs: RwLock<BTreeMap<String, OriginLog>>,
    unreachable: RwLock<HashSet<String>>,
    live: broadcast::Sender<SyncEnvelope>,
}

/// A shared in-process gossip fabric
#[derive(Clone)]
pub struct GossipHub {
    inner: Arc<HubInner>,
}

impl Default for GossipHub {
    fn default() -> Self {
        Self::new()
    }
}

impl GossipHub {
    /// Create a hub
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LIVE_CAPACITY)
    }

    /// Create a hub with a given live channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (live, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(HubInner {
                logs: RwLock::new(BTreeMap::new()),
                unreachable: RwLock::new(HashSet::new()),
                live,
            }),
        }
    }

    /// Attach a replica
    pub fn connect(&self, peer_id: impl Into<String>) -> HubBridge {
        HubBridge {
            hub: self.clone(),
            peer_id: peer_id.into(),
        }
    }

    /// Cut a replica off from the hub, or reconnect it
    pub fn set_reachable(&self, peer_id: &str, reachable: bool) {
        let mut unreachable = self.inner.unreachable.write();
        if reachable {
            unreachable.remove(peer_id);
        } else {
            unreachable.insert(peer_id.to_string());
        }
        tracing::debug!(peer = peer_id, reachable, "Hub reachability changed");
    }

    /// Whether a replica can currently reach the hub
    pub fn is_reachable(&self, peer_id: &str) -> bool {
        !self.inner.unreachable.read().contains(peer_id)
    }

    /// Number of frames published by an origin
    pub fn log_len(&self, origin: &str) -> usize {
        self.inner
            .logs
            .read()
            .get(origin)
            .map(|log| log.frames.len())
            .unwrap_or(0)
    }

    /// Append raw bytes to an origin's log, bypassing encoding
    ///
    /// Used to inject damaged frames.
    pub fn publish_raw(&self, origin: &str, frame: Vec<u8>) {
        self.inner
            .logs
            .write()
            .entry(origin.to_string())
            .or_default()
            .frames
            .push(frame);
    }

    fn check_reachable(&self, peer_id: &str) -> Result<()> {
        if self.is_reachable(peer_id) {
            Ok(())
        } else {
            Err(Error::PeerUnreachable(format!("{} cannot reach the hub", peer_id)))
        }
    }
}

/// One replica's connection to a [`GossipHub`]
#[derive(Clone)]
pub struct HubBridge {
    hub: GossipHub,
    peer_id: String,
}

impl HubBridge {
    /// The hub this bridge is attached to
    pub fn hub(&self) -> &GossipHub {
        &self.hub
    }
}

#[async_trait]
impl SyncBridge for HubBridge {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    async fn push(&self, envelope: &SyncEnvelope) -> Result<()> {
        self.hub.check_reachable(&self.peer_id)?;
        if envelope.origin != self.peer_id {
            return Err(Error::PeerRejected(format!(
                "{} cannot publish on behalf of {}",
                self.peer_id, envelope.origin
            )));
        }

        let frame = envelope.to_bytes()?;
        {
            let mut logs = self.hub.inner.logs.write();
            let log = logs.entry(envelope.origin.clone()).or_default();
            if !log.ids.insert(envelope.id.clone()) {
                tracing::trace!(id = %envelope.id, "Duplicate push ignored");
                return Ok(());
            }
            log.frames.push(frame);
        }

        if envelope.topic.is_some() {
            // No live listeners is fine, the envelope is in the log
            let _ = self.hub.inner.live.send(envelope.clone());
        }
        Ok(())
    }

    async fn pull(&self, since: &SyncCursor, limit: usize) -> Result<PullBatch> {
        self.hub.check_reachable(&self.peer_id)?;

        let logs = self.hub.inner.logs.read();
        let mut batch = PullBatch {
            envelopes: Vec::new(),
            cursor: since.clone(),
            has_more: false,
        };

        'origins: for (origin, log) in logs.iter() {
            if *origin == self.peer_id {
                continue;
            }
            let start = since.position(origin) as usize;
            for (index, frame) in log.frames.iter().enumerate().skip(start) {
                if batch.envelopes.len() >= limit {
                    batch.has_more = true;
                    break 'origins;
                }
                batch.cursor.advance(origin, index as u64 + 1);
                match SyncEnvelope::from_bytes(frame) {
                    Ok(envelope) => batch.envelopes.push(envelope),
                    Err(e) => {
                        tracing::warn!(origin = %origin, position = index, "Skipping damaged frame: {}", e);
                    }
                }
            }
        }

        Ok(batch)
    }

    async fn subscribe(&self, topic: &str, handler: EnvelopeHandler) -> Result<TopicSubscription> {
        self.hub.check_reachable(&self.peer_id)?;

        let mut rx = self.hub.inner.live.subscribe();
        let hub = self.hub.clone();
        let peer_id = self.peer_id.clone();
        let wanted = topic.to_string();

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if envelope.topic.as_deref() != Some(wanted.as_str())
                            || envelope.origin == peer_id
                            || !hub.is_reachable(&peer_id)
                        {
                            continue;
                        }
                        handler(envelope);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Missed envelopes are still in the log for the next pull
                        tracing::warn!(topic = %wanted, skipped, "Live topic lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(TopicSubscription::new(topic, task))
    }
}
