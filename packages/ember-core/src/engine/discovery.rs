//! Swipes, the discovery feed and match management.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::Engine;
use crate::error::Result;
use crate::matching::{
    rank_candidates, ActionKind, Candidate, CandidateFilter, LikeAction, MatchFlag, MatchState,
    MatchStatus, MutualMatch,
};
use crate::profile::{require_active, Profile, ProfileId};
use crate::storage::StoreExt;

/// What a swipe did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwipeOutcome {
    /// The action now on record for the pair
    pub action: LikeAction,
    /// False when a newer action for the pair was already stored
    pub recorded: bool,
    /// Whether the pair is matched after the swipe
    pub matched: bool,
    /// Set when this swipe created the match
    pub new_match: Option<MutualMatch>,
}

/// A match seen from one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchEntry {
    /// The other profile
    pub with: ProfileId,
    /// The match record
    pub details: MutualMatch,
    /// Current status
    pub status: MatchStatus,
}

impl Engine {
    // ========================================================================
    // SWIPES
    // ========================================================================

    /// Record a like, pass or super-like
    ///
    /// A positive swipe checks reciprocity straight away, so the match is
    /// reported to the second swiper in the same call.
    pub fn submit_swipe(
        &self,
        actor: &str,
        target: &str,
        kind: ActionKind,
        at: i64,
    ) -> Result<SwipeOutcome> {
        let outcome = self.ledger.record(actor, target, kind, at)?;
        let recorded = outcome.is_written();

        let action = match outcome.into_written() {
            Some(written) => {
                self.publish(&written, None);
                written
            }
            None => match self.ledger.action(actor, target)? {
                Some(stored) => stored,
                None => LikeAction {
                    actor: actor.to_string(),
                    target: target.to_string(),
                    kind,
                    at,
                },
            },
        };

        if !recorded {
            tracing::debug!(actor, target, "Stale swipe ignored");
        }

        let state = self.detector.evaluate(actor, target)?;
        let matched = state.is_matched();
        let new_match = self.publish_created(state);

        Ok(SwipeOutcome {
            action,
            recorded,
            matched,
            new_match,
        })
    }

    /// Likes and super-likes received, newest first
    pub fn who_liked_me(&self, id: &str) -> Result<Vec<LikeAction>> {
        require_active(self.store.as_ref(), id)?;
        self.ledger.likes_to(id)
    }

    // ========================================================================
    // DISCOVERY
    // ========================================================================

    /// The ranked discovery feed for a profile
    pub fn get_candidates(
        &self,
        for_profile: &str,
        max_distance_km: f64,
        filter: &CandidateFilter,
    ) -> Result<Vec<Candidate>> {
        let viewer = require_active(self.store.as_ref(), for_profile)?;

        let mut excluded: HashSet<ProfileId> = HashSet::new();
        if !filter.include_acted {
            excluded.extend(
                self.ledger
                    .actions_from(for_profile)?
                    .into_iter()
                    .map(|a| a.target),
            );
        }
        for entry in self.matches_for(for_profile)? {
            if entry.status == MatchStatus::Blocked {
                excluded.insert(entry.with);
            }
        }

        let pool: Vec<Profile> = self.store.load_all("")?;
        let ranked = rank_candidates(&viewer, pool.iter(), max_distance_km, filter, &excluded);

        tracing::debug!(
            viewer = for_profile,
            pool = pool.len(),
            returned = ranked.len(),
            "Candidates ranked"
        );
        Ok(ranked)
    }

    // ========================================================================
    // MATCHES
    // ========================================================================

    /// Whether two profiles are mutually matched
    ///
    /// Creates the match if both likes are on record but it was never
    /// derived, for instance after a cold sync.
    pub fn check_mutual(&self, x: &str, y: &str) -> Result<bool> {
        let state = self.detector.evaluate(x, y)?;
        let matched = state.is_matched();
        self.publish_created(state);
        Ok(matched)
    }

    /// Every match of a profile, newest first
    pub fn matches_for(&self, id: &str) -> Result<Vec<MatchEntry>> {
        let mut entries = Vec::new();
        for details in self.detector.matches_for(id)? {
            let Some(with) = details.other(id).map(str::to_string) else {
                continue;
            };
            let status = self.detector.status(&details.a, &details.b)?;
            entries.push(MatchEntry {
                with,
                details,
                status,
            });
        }
        entries.sort_by(|x, y| {
            y.details
                .at
                .cmp(&x.details.at)
                .then_with(|| x.with.cmp(&y.with))
        });
        Ok(entries)
    }

    /// Unmatch, block or reactivate a match on behalf of one participant
    ///
    /// Only the profile that blocked can lift the block.
    pub fn set_match_status(
        &self,
        x: &str,
        y: &str,
        by: &str,
        status: MatchStatus,
    ) -> Result<MatchFlag> {
        let flag = self.detector.set_status(
            x,
            y,
            by,
            status,
            crate::time::now_timestamp_millis(),
        )?;
        self.publish(&flag, None);
        Ok(flag)
    }

    /// Publish a match this replica just derived
    pub(super) fn publish_created(&self, state: MatchState) -> Option<MutualMatch> {
        match state {
            MatchState::Created(created) => {
                self.publish(&created, None);
                Some(created)
            }
            _ => None,
        }
    }
}
