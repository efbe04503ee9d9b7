//! # Match Detector
//!
//! Turns reciprocal likes into [`MutualMatch`] records.
//!
//! ## Pair State Machine
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         MATCH LIFECYCLE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   NoAction ──like──► Liked ──reciprocal like──► Matched                 │
//! │                                                    │                    │
//! │                                    (record is immutable from here)      │
//! │                                                    │                    │
//! │                        MatchFlag (separate entity) ▼                    │
//! │                  Active ◄──────► Unmatched      Blocked                 │
//! │                                                                         │
//! │  • Only the profile that blocked can lift the block                     │
//! │  • Messaging requires a match whose flag is Active                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Detection is event driven: it runs after every recorded like and after
//! every replicated like. There is no background re-scan.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::ledger::ActionLedger;
use super::scoring;
use crate::error::{Error, Result};
use crate::profile::{require_active, validate_profile_id, ProfileId};
use crate::storage::{last_write_wins, Entity, EntityKind, Store, StoreExt, WriteOutcome};

/// Canonical order for a pair of profile ids
pub fn canonical_pair<'a>(x: &'a str, y: &'a str) -> (&'a str, &'a str) {
    if x <= y {
        (x, y)
    } else {
        (y, x)
    }
}

/// Store key for an unordered pair
pub fn pair_key(x: &str, y: &str) -> String {
    let (a, b) = canonical_pair(x, y);
    format!("{}:{}", a, b)
}

/// A mutual match
///
/// `a < b` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutualMatch {
    /// Lower profile id
    pub a: ProfileId,
    /// Higher profile id
    pub b: ProfileId,
    /// Timestamp of the later of the two likes (ms)
    pub at: i64,
    /// Compatibility score when the match was made
    pub score: u8,
    /// Interests shared when the match was made
    pub shared_interests: BTreeSet<String>,
}

impl MutualMatch {
    /// Whether a profile is one side of this match
    pub fn involves(&self, id: &str) -> bool {
        self.a == id || self.b == id
    }

    /// The other side of the match
    pub fn other(&self, id: &str) -> Option<&str> {
        if self.a == id {
            Some(&self.b)
        } else if self.b == id {
            Some(&self.a)
        } else {
            None
        }
    }

    /// Check the canonical ordering
    pub fn validate(&self) -> Result<()> {
        validate_profile_id(&self.a)?;
        validate_profile_id(&self.b)?;
        if self.a >= self.b {
            return Err(Error::InvalidProfile(format!(
                "Match pair {}:{} is not in canonical order",
                self.a, self.b
            )));
        }
        Ok(())
    }
}

impl Entity for MutualMatch {
    const KIND: EntityKind = EntityKind::Match;

    fn key(&self) -> String {
        pair_key(&self.a, &self.b)
    }

    fn updated_at(&self) -> i64 {
        self.at
    }

    fn resolve(_existing: &Self, _incoming: Self) -> Option<Self> {
        // Immutable once written
        None
    }
}

/// Relationship state layered over an immutable match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStatus {
    /// Both can message
    Active,
    /// One side unmatched, history kept
    Unmatched,
    /// One side blocked, only they can lift it
    Blocked,
}

impl MatchStatus {
    /// Convert to storage string
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Active => "active",
            MatchStatus::Unmatched => "unmatched",
            MatchStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFlag {
    /// Lower profile id
    pub a: ProfileId,
    /// Higher profile id
    pub b: ProfileId,
    /// Status
    pub status: MatchStatus,
    /// Who set it
    pub by: ProfileId,
    /// When it was set (ms)
    pub updated_at: i64,
}

impl MatchFlag {
    /// Whether `incoming` may not replace this flag regardless of time
    ///
    /// A block only yields to another write from the same profile.
    fn shields_against(&self, incoming: &MatchFlag) -> bool {
        self.status == MatchStatus::Blocked
            && incoming.status != MatchStatus::Blocked
            && incoming.by != self.by
    }
}

impl Entity for MatchFlag {
    const KIND: EntityKind = EntityKind::MatchFlag;

    fn key(&self) -> String {
        pair_key(&self.a, &self.b)
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn resolve(existing: &Self, incoming: Self) -> Option<Self> {
        if existing.shields_against(&incoming) {
            return None;
        }
        if incoming.shields_against(existing) {
            return Some(incoming);
        }
        last_write_wins(existing, incoming)
    }
}

/// Outcome of a reciprocity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchState {
    /// Not both directions liked, no match on record
    NoMatch,
    /// A match was already on record
    Existing(MutualMatch),
    /// This check created the match
    Created(MutualMatch),
}

impl MatchState {
    /// Whether a match exists
    pub fn is_matched(&self) -> bool {
        !matches!(self, MatchState::NoMatch)
    }

    /// The match, if any
    pub fn into_match(self) -> Option<MutualMatch> {
        match self {
            MatchState::Existing(m) | MatchState::Created(m) => Some(m),
            MatchState::NoMatch => None,
        }
    }
}

/// The match detector
#[derive(Clone)]
pub struct MatchDetector {
    store: Arc<dyn Store>,
    ledger: ActionLedger,
}

impl MatchDetector {
    /// Create a detector over a store and its ledger
    pub fn new(store: Arc<dyn Store>, ledger: ActionLedger) -> Self {
        Self { store, ledger }
    }

    /// Check reciprocity, creating the match on the first positive check
    pub fn evaluate(&self, x: &str, y: &str) -> Result<MatchState> {
        if x == y {
            return Ok(MatchState::NoMatch);
        }
        if let Some(existing) = self.get_match(x, y)? {
            return Ok(MatchState::Existing(existing));
        }

        let (Some(forward), Some(backward)) = (self.ledger.action(x, y)?, self.ledger.action(y, x)?)
        else {
            return Ok(MatchState::NoMatch);
        };
        if !forward.kind.is_positive() || !backward.kind.is_positive() {
            return Ok(MatchState::NoMatch);
        }

        let (a, b) = canonical_pair(x, y);
        let first = require_active(self.store.as_ref(), a)?;
        let second = require_active(self.store.as_ref(), b)?;
        let compatibility = scoring::score(&first, &second);

        let candidate = MutualMatch {
            a: a.to_string(),
            b: b.to_string(),
            at: forward.at.max(backward.at),
            score: compatibility.score,
            shared_interests: compatibility.shared,
        };

        match self.store.save(&candidate)? {
            WriteOutcome::Inserted(created) => {
                tracing::info!(a = %created.a, b = %created.b, score = created.score, "Mutual match created");
                Ok(MatchState::Created(created))
            }
            // Lost a race with another writer; report what is stored
            _ => match self.get_match(x, y)? {
                Some(stored) => Ok(MatchState::Existing(stored)),
                None => Ok(MatchState::NoMatch),
            },
        }
    }

    /// Whether `x` and `y` are matched, creating the match if due
    ///
    /// Symmetric in its arguments.
    pub fn check_mutual(&self, x: &str, y: &str) -> Result<bool> {
        Ok(self.evaluate(x, y)?.is_matched())
    }

    /// Merge a replicated match
    ///
    /// The payload is only a hint: the match is re-derived from the local
    /// ledger and scored against the local profiles. Without both likes on
    /// record here the envelope is refused with [`Error::NotMatched`].
    pub fn apply(&self, incoming: MutualMatch) -> Result<MatchState> {
        incoming.validate()?;
        require_active(self.store.as_ref(), &incoming.a)?;
        require_active(self.store.as_ref(), &incoming.b)?;

        match self.evaluate(&incoming.a, &incoming.b)? {
            MatchState::NoMatch => Err(Error::NotMatched),
            state => Ok(state),
        }
    }

    /// The match for a pair, if any
    pub fn get_match(&self, x: &str, y: &str) -> Result<Option<MutualMatch>> {
        self.store.load(&pair_key(x, y))
    }

    /// Every match involving a profile
    pub fn matches_for(&self, id: &str) -> Result<Vec<MutualMatch>> {
        let mut matches: Vec<MutualMatch> = self.store.load_all("")?;
        matches.retain(|m| m.involves(id));
        Ok(matches)
    }

    /// The status flag of a pair, if one was ever set
    pub fn flag(&self, x: &str, y: &str) -> Result<Option<MatchFlag>> {
        self.store.load(&pair_key(x, y))
    }

    /// Current status of a match (Active when never flagged)
    pub fn status(&self, x: &str, y: &str) -> Result<MatchStatus> {
        Ok(self
            .flag(x, y)?
            .map(|f| f.status)
            .unwrap_or(MatchStatus::Active))
    }

    /// Whether the pair has a match that allows messaging
    pub fn is_active_match(&self, x: &str, y: &str) -> Result<bool> {
        if self.get_match(x, y)?.is_none() {
            return Ok(false);
        }
        Ok(self.status(x, y)? == MatchStatus::Active)
    }

    /// Change the status of a match on behalf of one participant
    pub fn set_status(
        &self,
        x: &str,
        y: &str,
        by: &str,
        status: MatchStatus,
        at: i64,
    ) -> Result<MatchFlag> {
        let Some(matched) = self.get_match(x, y)? else {
            return Err(Error::MatchNotFound);
        };
        if !matched.involves(by) {
            return Err(Error::InvalidProfile(format!(
                "{} is not part of this match",
                by
            )));
        }

        let previous = self.flag(x, y)?;
        let flag = MatchFlag {
            a: matched.a.clone(),
            b: matched.b.clone(),
            status,
            by: by.to_string(),
            updated_at: previous
                .as_ref()
                .map(|p| crate::time::next_timestamp_after(p.updated_at).max(at))
                .unwrap_or(at),
        };

        if previous.as_ref().is_some_and(|p| p.shields_against(&flag)) {
            return Err(Error::MatchBlocked);
        }

        let stored = match self.store.save(&flag)?.into_written() {
            Some(stored) => stored,
            None => self.flag(x, y)?.unwrap_or(flag),
        };
        tracing::info!(a = %stored.a, b = %stored.b, status = %stored.status, "Match status changed");
        Ok(stored)
    }

    /// Merge a replicated status flag
    pub fn apply_flag(&self, incoming: MatchFlag) -> Result<WriteOutcome<MatchFlag>> {
        validate_profile_id(&incoming.a)?;
        validate_profile_id(&incoming.b)?;
        if incoming.by != incoming.a && incoming.by != incoming.b {
            return Err(Error::InvalidProfile(format!(
                "{} is not part of this match",
                incoming.by
            )));
        }
        self.store.save(&incoming)
    }

    /// Remove every match and flag involving a profile
    pub fn purge_profile(&self, id: &str) -> Result<(usize, usize)> {
        let mut matches = 0;
        for m in self.matches_for(id)? {
            if self.store.purge::<MutualMatch>(&m.key())? {
                matches += 1;
            }
        }

        let mut flags = 0;
        let all: Vec<MatchFlag> = self.store.load_all("")?;
        for flag in all.into_iter().filter(|f| f.a == id || f.b == id) {
            if self.store.purge::<MatchFlag>(&flag.key())? {
                flags += 1;
            }
        }

        Ok((matches, flags))
    }
}
