//! Applying replicated writes and driving the sync rounds.
//!
//! ## Sync Round
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            SYNC ROUND                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. flush outbox            (backoff, unsent stays queued)              │
//! │  2. pull since cursor       (every remote origin)                       │
//! │  3. apply batch             Profile → Action → Match → Flag → Message   │
//! │        positive action ──► MatchDetector.evaluate                       │
//! │        profile tombstone ──► purge local references                     │
//! │        new message ──► live chat feed                                   │
//! │  4. commit cursor                                                       │
//! │  5. flush again             (matches derived in step 3)                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;
use tokio::task::JoinHandle;

use super::Engine;
use crate::chat::ChatMessage;
use crate::error::{Error, Result};
use crate::matching::{LikeAction, MatchFlag, MutualMatch};
use crate::profile::{require_active, Profile};
use crate::storage::{Entity, EntityKind, StoreExt, WriteOutcome};
use crate::sync::SyncEnvelope;

/// Summary of one sync round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Local writes pushed
    pub pushed: usize,
    /// Local writes still waiting
    pub pending: usize,
    /// Remote envelopes fetched
    pub pulled: usize,
    /// Remote envelopes that changed the local store
    pub applied: usize,
    /// Remote envelopes refused
    pub rejected: usize,
    /// Matches derived from remote actions
    pub new_matches: usize,
    /// Last failure seen during the round
    pub last_error: Option<String>,
}

/// Effect of applying one remote envelope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeOutcome {
    /// Whether the local store changed
    pub changed: bool,
    /// Match derived because of it
    pub new_match: Option<MutualMatch>,
}

fn open_checked<E: Entity>(envelope: &SyncEnvelope) -> Result<E> {
    let entity: E = envelope.open()?;
    if entity.key() != envelope.key {
        return Err(Error::DeserializationError(format!(
            "Envelope key {} does not match its {} payload",
            envelope.key, envelope.kind
        )));
    }
    Ok(entity)
}

impl Engine {
    /// Run one push/pull round
    ///
    /// Never fails: transport problems are reported in
    /// [`SyncReport::last_error`] and retried on the next round.
    pub async fn sync_now(&self) -> SyncReport {
        let mut report = SyncReport::default();

        let pushed = self.replicator.flush().await;
        report.pushed = pushed.pushed;
        report.last_error = pushed.last_error;

        match self.replicator.pull().await {
            Ok(pulled) => {
                let mut envelopes = pulled.envelopes;
                envelopes.sort_by_key(|e| e.kind);
                report.pulled = envelopes.len();

                for envelope in &envelopes {
                    match self.apply_envelope(envelope) {
                        Ok(outcome) => {
                            if outcome.changed {
                                report.applied += 1;
                            }
                            if outcome.new_match.is_some() {
                                report.new_matches += 1;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                origin = %envelope.origin,
                                kind = %envelope.kind,
                                key = %envelope.key,
                                "Rejected remote envelope: {}",
                                e
                            );
                            report.rejected += 1;
                        }
                    }
                }

                if let Err(e) = self.replicator.commit(&pulled.cursor) {
                    tracing::warn!("Failed to persist sync cursor: {}", e);
                    report.last_error = Some(e.to_string());
                }
            }
            Err(e) => {
                tracing::warn!("Pull failed: {}", e);
                report.last_error = Some(e.to_string());
            }
        }

        let pushed = self.replicator.flush().await;
        report.pushed += pushed.pushed;
        report.pending = pushed.pending;
        if pushed.last_error.is_some() {
            report.last_error = pushed.last_error;
        }

        tracing::debug!(
            pushed = report.pushed,
            pending = report.pending,
            pulled = report.pulled,
            applied = report.applied,
            rejected = report.rejected,
            "Sync round finished"
        );
        report
    }

    /// Merge one write from another replica into the local store
    ///
    /// Envelopes this replica produced itself are ignored.
    pub fn apply_envelope(&self, envelope: &SyncEnvelope) -> Result<EnvelopeOutcome> {
        if envelope.origin == self.peer_id() {
            return Ok(EnvelopeOutcome::default());
        }

        match envelope.kind {
            EntityKind::Profile => {
                let profile: Profile = open_checked(envelope)?;
                profile.validate()?;
                let written = self.store.save(&profile)?.into_written();
                if let Some(stored) = &written {
                    if stored.deleted {
                        let purged = self.purge_local(&stored.id)?;
                        tracing::info!(
                            profile = %stored.id,
                            actions = purged.actions,
                            matches = purged.matches,
                            messages = purged.messages,
                            "Applied remote erasure"
                        );
                    }
                }
                Ok(EnvelopeOutcome {
                    changed: written.is_some(),
                    new_match: None,
                })
            }

            EntityKind::Action => {
                let action: LikeAction = open_checked(envelope)?;
                let changed = self.ledger.apply(action.clone())?.is_written();
                let state = self.detector.evaluate(&action.actor, &action.target)?;
                Ok(EnvelopeOutcome {
                    changed,
                    new_match: self.publish_created(state),
                })
            }

            EntityKind::Match => {
                let incoming: MutualMatch = open_checked(envelope)?;
                let new_match = self.publish_created(self.detector.apply(incoming)?);
                Ok(EnvelopeOutcome {
                    changed: new_match.is_some(),
                    new_match,
                })
            }

            EntityKind::MatchFlag => {
                let flag: MatchFlag = open_checked(envelope)?;
                Ok(EnvelopeOutcome {
                    changed: self.detector.apply_flag(flag)?.is_written(),
                    new_match: None,
                })
            }

            EntityKind::Message => {
                let message: ChatMessage = open_checked(envelope)?;
                message.validate(self.config.max_message_length)?;
                require_active(self.store.as_ref(), &message.sender_id)?;
                require_active(self.store.as_ref(), &message.recipient_id)?;
                if self
                    .detector
                    .get_match(&message.sender_id, &message.recipient_id)?
                    .is_none()
                {
                    return Err(Error::NotMatched);
                }

                let outcome = self.store.save(&message)?;
                if let WriteOutcome::Inserted(inserted) = &outcome {
                    let _ = self.chat_tx.send(inserted.clone());
                }
                Ok(EnvelopeOutcome {
                    changed: outcome.is_written(),
                    new_match: None,
                })
            }
        }
    }

    /// Run [`Engine::sync_now`] every `sync.poll_interval_ms`
    ///
    /// Abort the handle to stop the loop.
    pub fn spawn_sync_loop(&self) -> JoinHandle<()> {
        let engine = self.clone();
        let period = Duration::from_millis(self.config.sync.poll_interval_ms);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(peer = %engine.peer_id(), period_ms = period.as_millis() as u64, "Sync loop started");

            loop {
                ticker.tick().await;
                let report = engine.sync_now().await;
                if let Some(error) = &report.last_error {
                    tracing::debug!(pending = report.pending, "Sync round incomplete: {}", error);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::matching::{ActionKind, MatchStatus};
    use crate::profile::Intent;
    use crate::storage::{SqliteStore, Store, StoredRecord};
    use crate::sync::GossipHub;
    use std::sync::{Arc, Mutex};

    async fn converge(replicas: &[&Engine]) {
        for _ in 0..2 {
            for replica in replicas {
                replica.sync_now().await;
            }
        }
    }

    #[tokio::test]
    async fn test_later_action_wins_across_replicas() {
        let hub = GossipHub::new();
        let phone = engine_on(&hub, "phone");
        let laptop = engine_on(&hub, "laptop");
        add(&phone, "a", &["art"], Intent::Open);
        add(&phone, "b", &["art"], Intent::Open);
        converge(&[&phone, &laptop]).await;

        phone.submit_swipe("a", "b", ActionKind::Like, 1_000).unwrap();
        laptop.submit_swipe("a", "b", ActionKind::Pass, 2_000).unwrap();
        converge(&[&phone, &laptop]).await;

        for replica in [&phone, &laptop] {
            let action = replica.ledger().action("a", "b").unwrap().unwrap();
            assert_eq!(action.kind, ActionKind::Pass);
            assert_eq!(action.at, 2_000);
        }
    }

    #[tokio::test]
    async fn test_match_derived_on_both_replicas() {
        let hub = GossipHub::new();
        let first = engine_on(&hub, "p1");
        let second = engine_on(&hub, "p2");
        add(&first, "alice", &["art", "coffee"], Intent::LongTerm);
        add(&second, "bob", &["art"], Intent::ShortTerm);
        converge(&[&first, &second]).await;

        first.submit_swipe("alice", "bob", ActionKind::Like, 10).unwrap();
        second.submit_swipe("bob", "alice", ActionKind::Like, 20).unwrap();

        first.sync_now().await;
        let report = second.sync_now().await;
        assert_eq!(report.new_matches, 1);
        first.sync_now().await;

        let on_first = first.detector().get_match("alice", "bob").unwrap().unwrap();
        let on_second = second.detector().get_match("bob", "alice").unwrap().unwrap();
        assert_eq!(on_first, on_second);
        assert_eq!(on_first.at, 20);
        assert_eq!(on_first.score, 25);
        assert!(first.check_mutual("bob", "alice").unwrap());
    }

    #[tokio::test]
    async fn test_remote_message_reaches_subscriber_once() {
        let hub = GossipHub::new();
        let first = engine_on(&hub, "p1");
        let second = engine_on(&hub, "p2");
        add(&first, "alice", &["art"], Intent::Open);
        add(&second, "bob", &["art"], Intent::Open);
        converge(&[&first, &second]).await;
        first.submit_swipe("alice", "bob", ActionKind::Like, 1).unwrap();
        second.submit_swipe("bob", "alice", ActionKind::Like, 2).unwrap();
        converge(&[&first, &second]).await;

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let _subscription = second
            .subscribe_chat("bob", "alice", move |msg| sink.lock().unwrap().push(msg.id))
            .await
            .unwrap();

        let sent = first.send_message("alice", "bob", "hello bob").unwrap();
        // Push goes out on the live topic, then the pull sees it again
        first.sync_now().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        second.sync_now().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*received.lock().unwrap(), vec![sent.id.clone()]);
        let thread = second.messages_between("alice", "bob").unwrap();
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].body, "hello bob");
    }

    #[tokio::test]
    async fn test_unreachable_hub_keeps_writes_local() {
        let hub = GossipHub::new();
        let first = engine_on(&hub, "p1");
        let second = engine_on(&hub, "p2");

        hub.set_reachable("p1", false);
        add(&first, "alice", &["art"], Intent::Open);
        let report = first.sync_now().await;
        assert!(report.last_error.is_some());
        assert_eq!(report.pending, 1);
        assert!(first.get_profile("alice").unwrap().is_some());

        second.sync_now().await;
        assert!(second.get_profile("alice").unwrap().is_none());

        hub.set_reachable("p1", true);
        let report = first.sync_now().await;
        assert_eq!(report.pushed, 1);
        assert_eq!(report.pending, 0);
        assert!(report.last_error.is_none());

        second.sync_now().await;
        assert!(second.get_profile("alice").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_offline_write_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phone.db");
        let path = path.to_str().unwrap();
        let hub = GossipHub::new();
        let open_phone = |hub: &GossipHub| {
            let store: Arc<dyn Store> = Arc::new(SqliteStore::open(Some(path)).unwrap());
            Engine::with_parts(config("p1"), store, Arc::new(hub.connect("p1"))).unwrap()
        };

        hub.set_reachable("p1", false);
        {
            let phone = open_phone(&hub);
            add(&phone, "alice", &["art"], Intent::Open);
            let report = phone.sync_now().await;
            assert_eq!(report.pushed, 0);
            assert_eq!(report.pending, 1);
        }

        hub.set_reachable("p1", true);
        let phone = open_phone(&hub);
        let laptop = engine_on(&hub, "p2");
        assert_eq!(phone.pending_sync().unwrap(), 1);

        converge(&[&phone, &laptop]).await;
        assert_eq!(phone.pending_sync().unwrap(), 0);
        assert!(laptop.get_profile("alice").unwrap().is_some());
    }

    #[test]
    fn test_remote_match_cannot_rewrite_local_match() {
        let engine = engine();
        add(&engine, "alice", &["art", "coffee"], Intent::Open);
        add(&engine, "bob", &["art"], Intent::Open);
        add(&engine, "carol", &["art"], Intent::Open);
        engine.submit_swipe("alice", "bob", ActionKind::Like, 100).unwrap();
        engine.submit_swipe("bob", "alice", ActionKind::Like, 200).unwrap();
        let before = engine.detector().get_match("alice", "bob").unwrap().unwrap();

        let forged = MutualMatch {
            a: "alice".into(),
            b: "bob".into(),
            at: 1,
            score: 0,
            shared_interests: Default::default(),
        };
        let envelope = SyncEnvelope::wrap("elsewhere", &forged, None).unwrap();
        let outcome = engine.apply_envelope(&envelope).unwrap();
        assert!(!outcome.changed);
        assert!(outcome.new_match.is_none());

        let after = engine.detector().get_match("alice", "bob").unwrap().unwrap();
        assert_eq!(after, before);
        assert_eq!(after.at, 200);

        // A match the local ledger knows nothing about is refused
        let unliked = MutualMatch {
            a: "alice".into(),
            b: "carol".into(),
            ..forged
        };
        let envelope = SyncEnvelope::wrap("elsewhere", &unliked, None).unwrap();
        assert!(matches!(
            engine.apply_envelope(&envelope),
            Err(Error::NotMatched)
        ));
        assert!(!engine.check_mutual("alice", "carol").unwrap());
    }

    #[tokio::test]
    async fn test_erasure_propagates() {
        let hub = GossipHub::new();
        let first = engine_on(&hub, "p1");
        let second = engine_on(&hub, "p2");
        add(&first, "alice", &["art"], Intent::Open);
        add(&second, "bob", &["art"], Intent::Open);
        converge(&[&first, &second]).await;
        first.submit_swipe("alice", "bob", ActionKind::Like, 1).unwrap();
        second.submit_swipe("bob", "alice", ActionKind::Like, 2).unwrap();
        converge(&[&first, &second]).await;
        second.send_message("bob", "alice", "hi").unwrap();
        second
            .set_match_status("bob", "alice", "bob", MatchStatus::Active)
            .unwrap();
        converge(&[&first, &second]).await;
        assert_eq!(first.messages_between("alice", "bob").unwrap().len(), 1);

        first.erase_user_data("alice").unwrap();
        converge(&[&first, &second]).await;

        assert!(second.get_profile("alice").unwrap().is_none());
        assert!(second.matches_for("bob").unwrap().is_empty());
        assert!(second.messages_between("alice", "bob").unwrap().is_empty());
        assert!(second.ledger().actions_from("bob").unwrap().is_empty());
        assert!(second.detector().flag("alice", "bob").unwrap().is_none());
    }

    #[test]
    fn test_own_envelopes_are_ignored() {
        let engine = engine();
        let profile = add(&engine, "alice", &["art"], Intent::Open);
        let envelope = SyncEnvelope::wrap(engine.peer_id(), &profile, None).unwrap();
        assert_eq!(engine.apply_envelope(&envelope).unwrap(), EnvelopeOutcome::default());
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let engine = engine();
        let profile = add(&engine, "alice", &["art"], Intent::Open);
        let record = profile.to_record().unwrap();
        let forged = SyncEnvelope::from_record(
            "elsewhere",
            StoredRecord {
                key: "mallory".into(),
                ..record
            },
            None,
        );
        assert!(matches!(
            engine.apply_envelope(&forged),
            Err(Error::DeserializationError(_))
        ));
        assert!(engine.get_profile("mallory").unwrap().is_none());
    }

    #[test]
    fn test_remote_message_without_match_is_rejected() {
        let engine = engine();
        add(&engine, "alice", &["art"], Intent::Open);
        add(&engine, "bob", &["art"], Intent::Open);

        let message = ChatMessage::new("bob", "alice", "hi", 1);
        let envelope = SyncEnvelope::wrap("elsewhere", &message, Some(message.topic())).unwrap();
        assert!(matches!(
            engine.apply_envelope(&envelope),
            Err(Error::NotMatched)
        ));
        assert!(engine.messages_between("alice", "bob").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_loop_replicates_in_background() {
        let hub = GossipHub::new();
        let first = engine_on(&hub, "p1");
        let second = engine_on(&hub, "p2");
        let loops = [first.spawn_sync_loop(), second.spawn_sync_loop()];

        add(&first, "alice", &["art"], Intent::Open);
        let mut seen = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if second.get_profile("alice").unwrap().is_some() {
                seen = true;
                break;
            }
        }
        for handle in loops {
            handle.abort();
        }
        assert!(seen);
    }
}
