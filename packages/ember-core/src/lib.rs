//! # Ember Core
//!
//! A privacy-preserving discovery and matching engine. Profiles are placed
//! by coarse geohash tokens, ranked by shared interests and intent, matched
//! on reciprocal likes, and kept in a local-first store that replicates to
//! other devices on a best-effort basis.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          EMBER CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                         ┌──────────────────┐                            │
//! │                         │      Engine      │  swipe / candidates /      │
//! │                         │                  │  message / export / erase  │
//! │                         └────────┬─────────┘                            │
//! │          ┌───────────────┬───────┴────────┬────────────────┐            │
//! │          ▼               ▼                ▼                ▼            │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │    Geo      │  │  Matching   │  │    Chat     │  │    Sync     │     │
//! │  │             │  │             │  │             │  │             │     │
//! │  │ - Geohash   │  │ - Scoring   │  │ - Messages  │  │ - Bridge    │     │
//! │  │ - Haversine │  │ - Ledger    │  │ - Threads   │  │ - Hub       │     │
//! │  │ - Bands     │  │ - Detector  │  │ - Live feed │  │ - Outbox    │     │
//! │  └─────────────┘  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘     │
//! │                          └────────────────┼────────────────┘            │
//! │                                           ▼                             │
//! │                              ┌─────────────────────────┐                │
//! │                              │         Storage         │                │
//! │                              │  Store trait, SQLite,   │                │
//! │                              │  in-memory, quarantine  │                │
//! │                              └─────────────────────────┘                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`geo`] - Geohash codec and distance estimates
//! - [`profile`] - Profiles, intents and interest tags
//! - [`matching`] - Compatibility scoring, action ledger, match detection
//! - [`chat`] - Messages between matched profiles
//! - [`storage`] - Local-first store (SQLite, in-memory)
//! - [`sync`] - Replication bridge, in-process gossip hub, outbox
//! - [`engine`] - The application-facing API
//!
//! ## Privacy Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           PRIVACY RULES                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Location: raw coordinates are encoded once and dropped. Only the      │
//! │  geohash token (≈2.4 km at the default precision) is stored or synced. │
//! │                                                                         │
//! │  Chat: live topics are hashes of the participant pair, so the gossip   │
//! │  layer never sees who is talking to whom.                              │
//! │                                                                         │
//! │  Erasure: a profile tombstone removes every action, match and message  │
//! │  that references it, locally and on every replica that applies it.    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use ember_core::{ActionKind, Engine, EngineConfig, GeoPoint, Intent};
//!
//! let engine = Engine::open(EngineConfig::default())?;
//! let here = GeoPoint::new(52.52, 13.405)?;
//! engine.create_profile("alice", ["coffee", "hiking"], Intent::LongTerm, here)?;
//! engine.create_profile("bob", ["coffee"], Intent::Open, here)?;
//!
//! engine.submit_swipe("alice", "bob", ActionKind::Like, now)?;
//! let outcome = engine.submit_swipe("bob", "alice", ActionKind::Like, now)?;
//! assert!(outcome.matched);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod chat;
pub mod engine;
pub mod error;
pub mod geo;
pub mod matching;
pub mod profile;
pub mod storage;
pub mod sync;
/// Millisecond clock helpers.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use chat::{ChatMessage, ChatSubscription};
pub use engine::{
    Engine, ErasureReport, MatchEntry, SwipeOutcome, SyncReport, UserDataExport,
};
pub use error::{Error, Result};
pub use geo::{DistanceBand, GeoPoint, Geohash};
pub use matching::{
    ActionKind, Candidate, CandidateFilter, LikeAction, MatchStatus, MutualMatch,
};
pub use profile::{Intent, Profile, ProfileId, ProfileUpdate};
pub use storage::{MemoryStore, SqliteStore, Store};
pub use sync::{GossipHub, SyncBridge, SyncConfig};

// ============================================================================
// CONFIGURATION
// ============================================================================

use serde::{Deserialize, Serialize};

/// Configuration for an [`Engine`]
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```ignore
/// let config = EngineConfig::from_json(r#"{ "database_path": "ember.db" }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Id of this replica on the sync layer
    pub peer_id: String,
    /// SQLite file (in-memory when None)
    pub database_path: Option<String>,
    /// Geohash precision for new locations
    pub default_precision: usize,
    /// Longest accepted message body, in characters
    pub max_message_length: usize,
    /// Buffer of the live chat feed
    pub chat_channel_capacity: usize,
    /// Replication tuning
    pub sync: SyncConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            peer_id: uuid::Uuid::new_v4().to_string(),
            database_path: None,
            default_precision: geo::PRECISION_NEIGHBORHOOD,
            max_message_length: 4096,
            chat_channel_capacity: 256,
            sync: SyncConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("Unreadable configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value
    pub fn validate(&self) -> Result<()> {
        if self.peer_id.trim().is_empty() {
            return Err(Error::InvalidConfig("peer_id cannot be empty".into()));
        }
        if !(geo::geohash::MIN_PRECISION..=geo::geohash::MAX_PRECISION)
            .contains(&self.default_precision)
        {
            return Err(Error::InvalidConfig(format!(
                "default_precision must be between {} and {}",
                geo::geohash::MIN_PRECISION,
                geo::geohash::MAX_PRECISION
            )));
        }
        if self.max_message_length == 0 {
            return Err(Error::InvalidConfig(
                "max_message_length must be at least 1".into(),
            ));
        }
        if self.chat_channel_capacity == 0 {
            return Err(Error::InvalidConfig(
                "chat_channel_capacity must be at least 1".into(),
            ));
        }
        self.sync.validate()
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Ember Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TESTS
// ============================================================================
