//! # Engine
//!
//! The API the application calls into.
//!
//! ## Write Path
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            WRITE PATH                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  submit_swipe / send_message / upsert_profile / erase_user_data         │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  validate ──► Store.save (conflict policy) ──► return to caller         │
//! │                     │                                                   │
//! │                     └──► Replicator outbox ──► sync_now() / loop        │
//! │                                                                         │
//! │  Nothing on this path waits for the network. Sync failures show up in   │
//! │  SyncReport, never as an error from a write.                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine is cheap to clone; clones share the store, outbox and live
//! chat feed.

mod discovery;
mod messaging;
mod privacy;
mod replication;

pub use discovery::{MatchEntry, SwipeOutcome};
pub use privacy::{ErasureReport, UserDataExport, EXPORT_FORMAT_VERSION};
pub use replication::{EnvelopeOutcome, SyncReport};

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::chat::ChatMessage;
use crate::error::{Error, Result};
use crate::geo::{GeoPoint, Geohash};
use crate::matching::{ActionLedger, MatchDetector};
use crate::profile::{require_active, Intent, Profile, ProfileUpdate};
use crate::storage::{Entity, SqliteStore, Store, StoreExt};
use crate::sync::{GossipHub, Replicator, SyncBridge};
use crate::EngineConfig;

/// The discovery and matching engine
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    store: Arc<dyn Store>,
    ledger: ActionLedger,
    detector: MatchDetector,
    replicator: Arc<Replicator>,
    chat_tx: broadcast::Sender<ChatMessage>,
}

impl Engine {
    /// Open an engine on its own SQLite store, not connected to any peer
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = SqliteStore::open(config.database_path.as_deref())?;
        let bridge = GossipHub::new().connect(config.peer_id.clone());
        Self::with_parts(config, Arc::new(store), Arc::new(bridge))
    }

    /// Build an engine from an explicit store and transport
    pub fn with_parts(
        config: EngineConfig,
        store: Arc<dyn Store>,
        bridge: Arc<dyn SyncBridge>,
    ) -> Result<Self> {
        config.validate()?;
        if bridge.peer_id() != config.peer_id {
            return Err(Error::InvalidConfig(format!(
                "Bridge peer id {} does not match configured peer id {}",
                bridge.peer_id(),
                config.peer_id
            )));
        }

        let ledger = ActionLedger::new(store.clone());
        let detector = MatchDetector::new(store.clone(), ledger.clone());
        let replicator = Replicator::new(bridge, store.clone(), config.sync.clone());
        let (chat_tx, _) = broadcast::channel(config.chat_channel_capacity);

        tracing::info!(peer = %config.peer_id, "Engine ready");

        Ok(Self {
            config: Arc::new(config),
            store,
            ledger,
            detector,
            replicator: Arc::new(replicator),
            chat_tx,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Id of this replica
    pub fn peer_id(&self) -> &str {
        &self.config.peer_id
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The action ledger
    pub fn ledger(&self) -> &ActionLedger {
        &self.ledger
    }

    /// The match detector
    pub fn detector(&self) -> &MatchDetector {
        &self.detector
    }

    /// Writes waiting to be replicated
    pub fn pending_sync(&self) -> Result<usize> {
        self.replicator.pending()
    }

    /// Queue a stored entity for replication
    ///
    /// A failure here only delays replication, so it is logged, not returned.
    fn publish<E: Entity>(&self, entity: &E, topic: Option<String>) {
        if let Err(e) = self.replicator.enqueue_entity(entity, topic) {
            tracing::warn!(kind = %E::KIND, key = %entity.key(), "Failed to queue for replication: {}", e);
        }
    }

    // ========================================================================
    // PROFILES
    // ========================================================================

    /// Create or replace a profile
    ///
    /// `updated_at` is reassigned so it is strictly greater than any version
    /// already stored. Erased ids cannot be reused.
    pub fn upsert_profile(&self, profile: Profile) -> Result<Profile> {
        profile.validate()?;
        if profile.deleted {
            return Err(Error::InvalidProfile(
                "Use erase_user_data to delete a profile".into(),
            ));
        }
        if profile.location.is_none() {
            return Err(Error::InvalidProfile(format!(
                "Profile {} has no location",
                profile.id
            )));
        }

        let existing: Option<Profile> = self.store.load(&profile.id)?;
        if existing.as_ref().is_some_and(|p| p.deleted) {
            return Err(Error::InvalidProfile(format!(
                "Profile {} was erased",
                profile.id
            )));
        }

        let mut profile = profile;
        profile.updated_at = crate::time::next_timestamp_after(
            existing.as_ref().map(|p| p.updated_at).unwrap_or(0),
        );

        let stored = match self.store.save(&profile)?.into_written() {
            Some(stored) => {
                self.publish(&stored, None);
                tracing::info!(profile = %stored.id, "Profile saved");
                stored
            }
            // A concurrent writer got a later version in first
            None => self
                .store
                .load(&profile.id)?
                .ok_or_else(|| Error::UnknownProfile(profile.id.clone()))?,
        };
        Ok(stored)
    }

    /// Create a profile from raw coordinates
    ///
    /// The point is encoded at the configured precision and then dropped.
    pub fn create_profile<I, S>(
        &self,
        id: &str,
        interests: I,
        intent: Intent,
        point: GeoPoint,
    ) -> Result<Profile>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let location = Geohash::encode(point, self.config.default_precision)?;
        self.upsert_profile(Profile::new(id, interests, intent, location)?)
    }

    /// Apply partial updates to a profile
    pub fn update_profile(&self, id: &str, updates: Vec<ProfileUpdate>) -> Result<Profile> {
        let mut profile = require_active(self.store.as_ref(), id)?;
        for update in updates {
            profile.apply(update)?;
        }
        self.upsert_profile(profile)
    }

    /// Move a profile to new coordinates
    ///
    /// Only the geohash is kept.
    pub fn set_location(&self, id: &str, point: GeoPoint) -> Result<Geohash> {
        let location = Geohash::encode(point, self.config.default_precision)?;
        self.update_profile(id, vec![ProfileUpdate::Location(location.clone())])?;
        Ok(location)
    }

    /// A live profile
    pub fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        let profile: Option<Profile> = self.store.load(id)?;
        Ok(profile.filter(Profile::is_active))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::sync::GossipHub;

    pub fn config(peer: &str) -> EngineConfig {
        let mut config = EngineConfig {
            peer_id: peer.to_string(),
            ..EngineConfig::default()
        };
        config.sync.initial_backoff_ms = 1;
        config.sync.max_backoff_ms = 2;
        config.sync.max_push_attempts = 2;
        config.sync.poll_interval_ms = 10;
        config
    }

    pub fn engine_on(hub: &GossipHub, peer: &str) -> Engine {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(None).unwrap());
        Engine::with_parts(config(peer), store, Arc::new(hub.connect(peer))).unwrap()
    }

    pub fn engine() -> Engine {
        Engine::open(config("local")).unwrap()
    }

    pub fn berlin() -> GeoPoint {
        GeoPoint::new(52.52, 13.405).unwrap()
    }

    pub fn add(engine: &Engine, id: &str, interests: &[&str], intent: Intent) -> Profile {
        engine
            .create_profile(id, interests.iter().copied(), intent, berlin())
            .unwrap()
    }

    pub fn matched(engine: &Engine, x: &str, y: &str) {
        let at = crate::time::now_timestamp_millis();
        engine
            .submit_swipe(x, y, crate::matching::ActionKind::Like, at)
            .unwrap();
        let outcome = engine
            .submit_swipe(y, x, crate::matching::ActionKind::Like, at + 1)
            .unwrap();
        assert!(outcome.matched);
    }
}
