//! # Replicator
//!
//! Outbox and cursor bookkeeping on top of a [`SyncBridge`].
//!
//! Local writes are queued here and never wait on the network. The outbox
//! lives in the [`Store`], so a write queued while offline is still pushed
//! after a restart. `flush` drains it with exponential backoff; `pull`
//! fetches everything new since the persisted cursor, and `commit` moves
//! the cursor once the caller has applied what was pulled.
//!
//! ```text
//! flush, per entry (oldest first):
//!   pushed ───────────────► removed
//!   peer unreachable ─────► kept, round stops
//!   peer rejected ────────► kept, round moves on to the next entry
//!   undecodable / invalid ► removed
//! ```

use std::sync::Arc;
use std::time::Duration;

use super::{SyncBridge, SyncConfig, SyncCursor, SyncEnvelope};
use crate::error::{Error, Result};
use crate::storage::{Entity, OutboxEntry, Store};

/// Meta key holding the serialized pull cursor
pub const CURSOR_META_KEY: &str = "sync.cursor";

/// Outbox entries read from the store at a time
const OUTBOX_PAGE: usize = 64;

/// Result of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Envelopes accepted by the bridge
    pub pushed: usize,
    /// Envelopes that can never be sent and were dropped
    pub dropped: usize,
    /// Envelopes the peer refused this round, left queued
    pub deferred: usize,
    /// Envelopes still queued
    pub pending: usize,
    /// Last push failure seen during the round
    pub last_error: Option<String>,
}

/// Everything fetched by one pull
#[derive(Debug, Clone, Default)]
pub struct PulledChanges {
    /// Envelopes from other replicas
    pub envelopes: Vec<SyncEnvelope>,
    /// Cursor to commit once the envelopes are applied
    pub cursor: SyncCursor,
}

/// Outbox plus cursor for one replica
pub struct Replicator {
    bridge: Arc<dyn SyncBridge>,
    store: Arc<dyn Store>,
    config: SyncConfig,
    flush_lock: tokio::sync::Mutex<()>,
}

impl Replicator {
    /// Create a replicator
    ///
    /// Entries left in the store's outbox by an earlier run are picked up
    /// by the next flush.
    pub fn new(bridge: Arc<dyn SyncBridge>, store: Arc<dyn Store>, config: SyncConfig) -> Self {
        Self {
            bridge,
            store,
            config,
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Id of the local replica
    pub fn peer_id(&self) -> &str {
        self.bridge.peer_id()
    }

    /// The bridge in use
    pub fn bridge(&self) -> &Arc<dyn SyncBridge> {
        &self.bridge
    }

    /// Queue an envelope for the next flush
    pub fn enqueue(&self, envelope: &SyncEnvelope) -> Result<()> {
        let seq = self.store.outbox_append(&envelope.to_bytes()?)?;
        tracing::trace!(seq, kind = %envelope.kind, key = %envelope.key, "Queued for replication");
        Ok(())
    }

    /// Wrap and queue an entity
    pub fn enqueue_entity<E: Entity>(&self, entity: &E, topic: Option<String>) -> Result<()> {
        let envelope = SyncEnvelope::wrap(self.peer_id(), entity, topic)?;
        self.enqueue(&envelope)
    }

    /// Number of queued envelopes
    pub fn pending(&self) -> Result<usize> {
        self.store.outbox_len()
    }

    /// Drop queued envelopes whose key mentions a profile
    ///
    /// Entries that no longer decode are dropped too.
    pub fn discard_mentioning(&self, profile_id: &str) -> Result<usize> {
        let mut discarded = 0;
        let mut after = 0;

        loop {
            let page = self.store.outbox_entries(after, OUTBOX_PAGE)?;
            let Some(last) = page.last() else {
                break;
            };
            after = last.seq;

            for entry in page {
                let discard = match SyncEnvelope::from_bytes(&entry.payload) {
                    Ok(envelope) => envelope.mentions(profile_id),
                    Err(_) => true,
                };
                if discard && self.store.outbox_remove(entry.seq)? {
                    discarded += 1;
                }
            }
        }

        Ok(discarded)
    }

    /// Push queued envelopes in order
    ///
    /// An unreachable peer stops the round; the entry and everything behind
    /// it stay queued for the next flush. An envelope the peer refuses is
    /// left queued and the round moves on, so it never holds back later
    /// writes.
    pub async fn flush(&self) -> PushReport {
        let _guard = self.flush_lock.lock().await;
        let mut report = PushReport::default();
        let mut after = 0;

        'round: loop {
            let page = match self.store.outbox_entries(after, OUTBOX_PAGE) {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!("Failed to read outbox: {}", e);
                    report.last_error = Some(e.to_string());
                    break;
                }
            };
            if page.is_empty() {
                break;
            }

            for entry in page {
                after = entry.seq;
                if let Err(e) = self.push_entry(&entry, &mut report).await {
                    tracing::warn!(seq = entry.seq, "Push failed, keeping queued: {}", e);
                    report.last_error = Some(e.to_string());
                    break 'round;
                }
            }
        }

        report.pending = match self.pending() {
            Ok(pending) => pending,
            Err(e) => {
                report.last_error = Some(e.to_string());
                0
            }
        };
        if report.pushed > 0 {
            tracing::debug!(pushed = report.pushed, pending = report.pending, "Outbox flushed");
        }
        report
    }

    /// Push one entry, returning an error only when the round should stop
    async fn push_entry(&self, entry: &OutboxEntry, report: &mut PushReport) -> Result<()> {
        let envelope = match SyncEnvelope::from_bytes(&entry.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(seq = entry.seq, "Dropping undecodable outbox entry: {}", e);
                self.store.outbox_remove(entry.seq)?;
                report.dropped += 1;
                return Ok(());
            }
        };

        match self.push_with_backoff(&envelope).await {
            Ok(()) => {
                self.store.outbox_remove(entry.seq)?;
                report.pushed += 1;
                Ok(())
            }
            Err(e @ Error::PeerRejected(_)) => {
                tracing::warn!(key = %envelope.key, "Peer refused envelope, deferring: {}", e);
                report.deferred += 1;
                report.last_error = Some(e.to_string());
                Ok(())
            }
            Err(e) if e.is_recoverable() => Err(e),
            Err(e) => {
                tracing::warn!(key = %envelope.key, "Dropping unsendable envelope: {}", e);
                self.store.outbox_remove(entry.seq)?;
                report.dropped += 1;
                Ok(())
            }
        }
    }

    async fn push_with_backoff(&self, envelope: &SyncEnvelope) -> Result<()> {
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let max_backoff = Duration::from_millis(self.config.max_backoff_ms);
        let mut attempt = 1;

        loop {
            match self.bridge.push(envelope).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_recoverable() && attempt < self.config.max_push_attempts => {
                    tracing::debug!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Push failed, retrying after backoff: {}",
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The committed pull cursor
    ///
    /// An unreadable cursor is discarded; pulling from the start again is
    /// safe because applying an envelope twice has no further effect.
    pub fn cursor(&self) -> Result<SyncCursor> {
        let Some(raw) = self.store.get_meta(CURSOR_META_KEY)? else {
            return Ok(SyncCursor::new());
        };
        match serde_json::from_str(&raw) {
            Ok(cursor) => Ok(cursor),
            Err(e) => {
                tracing::warn!("Discarding unreadable sync cursor: {}", e);
                Ok(SyncCursor::new())
            }
        }
    }

    /// Fetch everything new since the committed cursor
    pub async fn pull(&self) -> Result<PulledChanges> {
        let mut cursor = self.cursor()?;
        let mut envelopes = Vec::new();

        loop {
            let batch = self
                .bridge
                .pull(&cursor, self.config.pull_batch_size)
                .await?;
            envelopes.extend(batch.envelopes);
            cursor = batch.cursor;
            if !batch.has_more {
                break;
            }
        }

        Ok(PulledChanges { envelopes, cursor })
    }

    /// Persist a cursor after its envelopes were applied
    pub fn commit(&self, cursor: &SyncCursor) -> Result<()> {
        let raw = serde_json::to_string(cursor)?;
        self.store.set_meta(CURSOR_META_KEY, &raw)
    }
}
