//! # Profiles
//!
//! Discovery profiles: the interest tags, stated intent and coarse
//! location the matching engine works from.
//!
//! ## Profile Data
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          DISCOVERY PROFILE                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  id: String (required)                                                  │
//! │  • 1-128 characters, no ':' (used as a key separator)                   │
//! │                                                                         │
//! │  interests: set of canonical tags                                       │
//! │  • at most 4 distinct tags after canonicalisation                       │
//! │  • canonical = trimmed, lowercase, single spaces                        │
//! │                                                                         │
//! │  intent: LongTerm | ShortTerm | Friends | Open                          │
//! │                                                                         │
//! │  location: Geohash (None only on tombstones)                            │
//! │                                                                         │
//! │  updated_at: ms timestamp, strictly increasing per profile (LWW)        │
//! │  deleted: tombstone flag, profiles are never physically removed         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::geo::Geohash;
use crate::storage::{last_write_wins, Entity, EntityKind, Store, StoreExt};

/// Profile identifiers are opaque strings supplied by the wallet layer
pub type ProfileId = String;

/// Maximum number of distinct interest tags
pub const MAX_INTERESTS: usize = 4;

/// Maximum length for a profile id
pub const MAX_PROFILE_ID_LENGTH: usize = 128;

/// Maximum length for one interest tag
pub const MAX_INTEREST_LENGTH: usize = 32;

/// Stated relationship intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Intent {
    /// Looking for a long-term relationship
    LongTerm,
    /// Looking for something short-term
    ShortTerm,
    /// Looking for friends
    Friends,
    /// Open to anything
    Open,
}

impl Intent {
    /// Convert to storage string
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::LongTerm => "long_term",
            Intent::ShortTerm => "short_term",
            Intent::Friends => "friends",
            Intent::Open => "open",
        }
    }

    /// Parse from storage string
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "long_term" => Ok(Intent::LongTerm),
            "short_term" => Ok(Intent::ShortTerm),
            "friends" => Ok(Intent::Friends),
            "open" => Ok(Intent::Open),
            other => Err(Error::InvalidIntent(other.to_string())),
        }
    }

    /// Whether two intents can be matched without a score penalty
    ///
    /// `Open` and `Friends` go with everything, `LongTerm` and `ShortTerm`
    /// go with each other, and identical intents always go together.
    pub fn compatible_with(self, other: Intent) -> bool {
        match (self, other) {
            (Intent::Open, _) | (_, Intent::Open) => true,
            (Intent::Friends, _) | (_, Intent::Friends) => true,
            (Intent::LongTerm, Intent::ShortTerm) | (Intent::ShortTerm, Intent::LongTerm) => true,
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Canonical form of an interest tag, `None` for blank input
pub fn canonical_interest(raw: &str) -> Option<String> {
    let tag = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if tag.is_empty() {
        None
    } else {
        Some(tag)
    }
}

/// Canonicalise and validate a set of interest tags
pub fn canonical_interests<I, S>(raw: I) -> Result<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tags = BTreeSet::new();
    for item in raw {
        let Some(tag) = canonical_interest(item.as_ref()) else {
            continue;
        };
        if tag.chars().count() > MAX_INTEREST_LENGTH {
            return Err(Error::InvalidProfile(format!(
                "Interest too long: max {} characters",
                MAX_INTEREST_LENGTH
            )));
        }
        tags.insert(tag);
    }

    if tags.len() > MAX_INTERESTS {
        return Err(Error::InvalidProfile(format!(
            "Too many interests: {} (max {})",
            tags.len(),
            MAX_INTERESTS
        )));
    }

    Ok(tags)
}

/// Validate a profile id
pub fn validate_profile_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidProfile("Profile id cannot be empty".into()));
    }
    if id.len() > MAX_PROFILE_ID_LENGTH {
        return Err(Error::InvalidProfile(format!(
            "Profile id too long: max {} characters",
            MAX_PROFILE_ID_LENGTH
        )));
    }
    if id.contains(':') {
        return Err(Error::InvalidProfile(
            "Profile id cannot contain ':'".into(),
        ));
    }
    Ok(())
}

/// A discovery profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile identifier
    pub id: ProfileId,
    /// Canonical interest tags
    pub interests: BTreeSet<String>,
    /// Stated intent
    pub intent: Intent,
    /// Coarse location token
    pub location: Option<Geohash>,
    /// Last modification (ms)
    pub updated_at: i64,
    /// Tombstone flag set by erasure
    #[serde(default)]
    pub deleted: bool,
}

impl Profile {
    /// Create a validated profile
    pub fn new<I, S>(id: impl Into<String>, interests: I, intent: Intent, location: Geohash) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let id = id.into();
        validate_profile_id(&id)?;

        Ok(Self {
            id,
            interests: canonical_interests(interests)?,
            intent,
            location: Some(location),
            updated_at: crate::time::now_timestamp_millis(),
            deleted: false,
        })
    }

    /// Re-check the invariants (used on profiles arriving from peers)
    pub fn validate(&self) -> Result<()> {
        validate_profile_id(&self.id)?;
        if self.deleted {
            return Ok(());
        }
        if self.location.is_none() {
            return Err(Error::InvalidProfile(format!(
                "Profile {} has no location",
                self.id
            )));
        }
        let canonical = canonical_interests(&self.interests)?;
        if canonical != self.interests {
            return Err(Error::InvalidProfile(format!(
                "Profile {} has non-canonical interests",
                self.id
            )));
        }
        Ok(())
    }

    /// Whether this profile is live (not erased)
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Apply a partial update
    pub fn apply(&mut self, update: ProfileUpdate) -> Result<()> {
        match update {
            ProfileUpdate::Interests(tags) => {
                self.interests = canonical_interests(tags)?;
            }
            ProfileUpdate::Intent(intent) => {
                self.intent = intent;
            }
            ProfileUpdate::Location(location) => {
                self.location = Some(location);
            }
        }
        Ok(())
    }

    /// The erased form of this profile
    ///
    /// Keeps only the id so references stay resolvable as "gone".
    pub fn tombstone(&self, at: i64) -> Self {
        Self {
            id: self.id.clone(),
            interests: BTreeSet::new(),
            intent: Intent::Open,
            location: None,
            updated_at: at,
            deleted: true,
        }
    }
}

impl Entity for Profile {
    const KIND: EntityKind = EntityKind::Profile;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn resolve(existing: &Self, incoming: Self) -> Option<Self> {
        // Erasure is final: a tombstone beats any live version.
        match (existing.deleted, incoming.deleted) {
            (true, false) => None,
            (false, true) => Some(incoming),
            _ => last_write_wins(existing, incoming),
        }
    }
}

/// Partial profile updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileUpdate {
    /// Replace the interest tags
    Interests(Vec<String>),
    /// Change intent
    Intent(Intent),
    /// Move to a new location token
    Location(Geohash),
}

/// Load a profile that must exist and not be erased
pub(crate) fn require_active(store: &dyn Store, id: &str) -> Result<Profile> {
    match store.load::<Profile>(id)? {
        Some(profile) if profile.is_active() => Ok(profile),
        _ => Err(Error::UnknownProfile(id.to_string())),
    }
}
